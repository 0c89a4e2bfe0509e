//! `opencorps purge-jobs <job-id>`

use anyhow::{Context, Result};
use clap::Args;

use opencorps_core::jobs::purge_duplicate_jobs;

use super::open_store;

/// Invalidate CI jobs superseded by a restarted job.
#[derive(Args, Debug)]
pub struct PurgeJobsArgs {
    /// Id of the job that stays valid.
    pub job_id: u64,
}

impl PurgeJobsArgs {
    pub fn run(self) -> Result<()> {
        let store = open_store()?;
        let report = purge_duplicate_jobs(&store, self.job_id)
            .with_context(|| format!("failed to purge duplicates of job {}", self.job_id))?;
        println!(
            "Invalidated {} job(s) and {} test result(s) superseded by job {}",
            report.jobs_invalidated, report.results_invalidated, self.job_id
        );
        Ok(())
    }
}
