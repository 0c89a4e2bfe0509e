//! CI job de-duplication.
//!
//! A CI provider may restart a job and report it more than once under new
//! ids. Only the most recently reported job for a `(repository_id, number)`
//! pair stays valid; older ones, and every test result hanging off them, are
//! marked invalid.

use crate::error::StoreError;
use crate::store::{ObjectStore, StoreExt};
use crate::types::{CiJob, TestResult};

/// What a purge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub jobs_invalidated: usize,
    pub results_invalidated: usize,
}

/// Invalidate every job sharing `(repository_id, number)` with `new_job_id`
/// except `new_job_id` itself, cascading to linked test results.
pub fn purge_duplicate_jobs<S: ObjectStore + ?Sized>(
    store: &S,
    new_job_id: u64,
) -> Result<PurgeReport, StoreError> {
    let Some(valid_job) = store.get::<CiJob>(&new_job_id.to_string())? else {
        tracing::warn!(job = new_job_id, "asked to purge duplicates of a job that is not stored");
        return Ok(PurgeReport::default());
    };
    if valid_job.repository_id.is_none() || valid_job.number.is_none() {
        tracing::debug!(job = new_job_id, "job has no repository/number, nothing to purge");
        return Ok(PurgeReport::default());
    }

    let duplicates = store.query::<CiJob>(|job| {
        job.id != valid_job.id
            && job.repository_id == valid_job.repository_id
            && job.number == valid_job.number
    })?;

    let mut report = PurgeReport::default();
    for mut duplicate in duplicates {
        tracing::info!(job = duplicate.id, superseded_by = valid_job.id, "invalidating duplicate job");

        let results = store.query::<TestResult>(|r| r.job == Some(duplicate.id) && r.valid)?;
        for mut result in results {
            tracing::info!(result = %result.id, job = duplicate.id, "invalidating historical test result");
            result.valid = false;
            store.put(&result)?;
            report.results_invalidated += 1;
        }

        if duplicate.valid {
            duplicate.valid = false;
            store.put(&duplicate)?;
            report.jobs_invalidated += 1;
        }
    }
    tracing::debug!(job = new_job_id, ?report, "purge of duplicate jobs complete");
    Ok(report)
}
