//! Inbound notifications: upstream pushes and CI callbacks.
//!
//! These functions record what arrived and tell the caller what to do next.
//! Like [`advance`](crate::advance), they mutate the project in place and
//! leave persisting it to the caller.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use opencorps_core::jobs::purge_duplicate_jobs;
use opencorps_core::{
    CiBuild, CiJob, ObjectStore, Project, ProjectKey, Push, Sha1, StoreError, StoreExt,
    TestResult,
};

use crate::clients::CiHost;
use crate::error::SyncError;
use crate::junit;

// ---------------------------------------------------------------------------
// Pushes
// ---------------------------------------------------------------------------

/// Repository section of a push notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRepository {
    pub full_name: String,
}

/// A push webhook delivery from the source host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub before: Sha1,
    pub after: Sha1,
    #[serde(default)]
    pub compare: Option<String>,
    pub repository: PushRepository,
}

/// What [`record_push`] did with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// New push stored and queued for merging.
    Recorded,
    /// The push was already known; the project should still be re-advanced.
    Redelivered,
    /// Nothing stored; the reason is logged and returned.
    Rejected(String),
}

impl PushOutcome {
    /// True if the caller should schedule `advance` for the project.
    pub fn needs_advance(&self) -> bool {
        matches!(self, PushOutcome::Recorded | PushOutcome::Redelivered)
    }
}

/// Store an upstream push and queue it for folding into the fork.
pub fn record_push(
    store: &dyn ObjectStore,
    project: &mut Project,
    note: &PushNotification,
) -> Result<PushOutcome, StoreError> {
    let Some(repo) = project.repo.as_ref() else {
        error!(project = %project.key, "project has no repository link");
        return Ok(PushOutcome::Rejected(format!(
            "project {} has no repository link",
            project.key
        )));
    };

    if let Some(existing) = store.get::<Push>(note.after.as_str())? {
        let unmerged = existing.after.is_some() && existing.fork_merge.is_none();
        if unmerged && !project.pending_merges.contains(&existing.id) {
            warn!(project = %project.key, push = %note.after, "push recorded but never folded into the fork, queueing it again");
            project.pending_merges.push(existing.id);
        } else {
            warn!(project = %project.key, push = %note.after, "push already recorded, re-advancing");
        }
        return Ok(PushOutcome::Redelivered);
    }

    if repo.full_name != note.repository.full_name {
        let reason = format!(
            "push for {} does not belong to {}",
            note.repository.full_name, repo.full_name
        );
        warn!(project = %project.key, "{reason}");
        return Ok(PushOutcome::Rejected(reason));
    }

    let mut push = Push::at(note.after.clone());
    push.ref_name = Some(note.ref_name.clone());
    push.before = Some(note.before.clone());
    push.after = Some(note.after.clone());
    push.compare = note.compare.clone();
    store.put(&push)?;

    if project.pending_merges.contains(&note.after) {
        warn!(project = %project.key, push = %note.after, "push already queued for merging");
    } else {
        project.pending_merges.push(note.after.clone());
    }
    project.failure_count = 0;
    info!(project = %project.key, push = %note.after, queued = project.pending_merges.len(), "recorded upstream push");
    Ok(PushOutcome::Recorded)
}

/// Load the project stored under `key`, apply [`record_push`] to it and
/// write it back, all inside the store's transaction boundary.
///
/// Returns `None` when no such project is stored.
pub fn ingest_push(
    store: &dyn ObjectStore,
    key: &ProjectKey,
    note: &PushNotification,
) -> Result<Option<(PushOutcome, Project)>, StoreError> {
    let mut ingested = None;
    store.atomically(&mut || {
        let Some(mut project) = store.get::<Project>(key.as_str())? else {
            warn!(project = %key, push = %note.after, "push for unknown project");
            return Ok(());
        };
        let outcome = record_push(store, &mut project, note)?;
        if outcome.needs_advance() {
            store.put(&project)?;
        }
        ingested = Some((outcome, project));
        Ok(())
    })?;
    Ok(ingested)
}

/// The push a commit belongs to: by id, else by the fork or CI commit it
/// produced. Ambiguous matches resolve to `None`.
pub fn locate_push(store: &dyn ObjectStore, commit: &Sha1) -> Result<Option<Push>, StoreError> {
    if let Some(push) = store.get::<Push>(commit.as_str())? {
        return Ok(Some(push));
    }
    let mut found = store.query::<Push>(|p| {
        p.fork_merge.as_ref() == Some(commit) || p.ci_update.as_ref() == Some(commit)
    })?;
    match found.len() {
        0 => {
            warn!(commit = %commit, "no push tracks this commit");
            Ok(None)
        }
        1 => Ok(found.pop()),
        n => {
            warn!(commit = %commit, matches = n, "commit is tracked by several pushes, ignoring");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// CI callbacks
// ---------------------------------------------------------------------------

/// Identifiers posted by a CI job when it reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiCallback {
    pub build_id: u64,
    pub job_id: u64,
    #[serde(default)]
    pub commit: Option<Sha1>,
}

/// Build and job records for a callback, fetched from the CI provider.
pub fn fetch_build_and_job(
    ci: &dyn CiHost,
    callback: &CiCallback,
) -> Result<(CiBuild, CiJob), SyncError> {
    if callback.build_id == 0 || callback.job_id == 0 {
        return Err(SyncError::MissingBuildInfo);
    }
    let payload = ci.build(callback.build_id)?;

    let mut build = CiBuild::new(callback.build_id, callback.commit.clone());
    build.repository_id = Some(payload.build.repository_id);
    build.number = Some(payload.build.number.clone());
    build.pull_request = payload.build.pull_request;
    build.state = Some(payload.build.state.clone());
    build.duration = payload.build.duration;
    build.job_ids = payload.build.job_ids.clone();

    let mut job = CiJob::new(callback.job_id, callback.commit.clone());
    job.build_id = Some(callback.build_id);
    job.repository_id = Some(payload.build.repository_id);
    match payload.jobs.iter().find(|j| j.id == callback.job_id) {
        Some(info) => {
            job.number = Some(info.number.clone());
            job.state = Some(info.state.clone());
            job.duration = info.duration;
            job.log_id = info.log_id;
        }
        None => warn!(
            build = callback.build_id,
            job = callback.job_id,
            "job missing from build payload"
        ),
    }
    Ok((build, job))
}

/// Store a JUnit report posted by a CI job and refresh the `sim` shield.
pub fn record_test_results(
    store: &dyn ObjectStore,
    ci: &dyn CiHost,
    project: &mut Project,
    callback: &CiCallback,
    xml: &str,
) -> Result<TestResult, SyncError> {
    let mut result = junit::parse(xml)?;
    let (build, job) = fetch_build_and_job(ci, callback)?;

    let push = match &callback.commit {
        Some(commit) => locate_push(store, commit)?,
        None => None,
    };
    result.job = Some(job.id);
    result.build = Some(build.id);
    result.push = push.map(|p| p.id);
    result.project = Some(project.key.clone());
    store.put(&result)?;

    let job = store.insert_or_update(job)?;
    let report = purge_duplicate_jobs(store, job.id)?;
    store.insert_or_update(build)?;
    debug!(project = %project.key, job = job.id, ?report, "stored CI job");

    project.update_sim_result(result.passed, result.failures, result.errors, result.skipped);
    info!(
        project = %project.key,
        tests = result.tests,
        passed = result.passed,
        failures = result.failures,
        errors = result.errors,
        "recorded test results"
    );
    Ok(result)
}

/// Attach an uploaded log file to its job. Returns the location the caller
/// should store the log content under.
pub fn record_log_file(
    store: &dyn ObjectStore,
    ci: &dyn CiHost,
    project: &Project,
    callback: &CiCallback,
    filename: Option<&str>,
) -> Result<String, SyncError> {
    let name = filename.filter(|n| !n.is_empty()).unwrap_or("unknown");
    let location = format!("/buildlogs/{}/{}/{}", project.key, callback.job_id, name);

    let (build, mut job) = fetch_build_and_job(ci, callback)?;
    job.logfiles.push(location.clone());
    let job = store.insert_or_update(job)?;
    purge_duplicate_jobs(store, job.id)?;
    store.insert_or_update(build)?;
    info!(project = %project.key, job = job.id, location = %location, "recorded log file");
    Ok(location)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
