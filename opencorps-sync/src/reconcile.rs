//! Folding upstream pushes into the fork, one at a time, oldest first.

use tracing::{error, info, warn};

use opencorps_core::{Project, Push, Sha1, StoreExt};

use crate::context::Context;
use crate::error::SyncError;

/// Apply the push at the head of `project.pending_merges` to the fork.
///
/// Tries a forced cherry-pick first and falls back to a merge. On success the
/// head is popped and the resulting commit is recorded as the push's
/// `fork_merge`. On failure the queue is left untouched. A head with no
/// stored push is dropped and reported as a failure.
pub fn apply_next(ctx: &Context<'_>, project: &mut Project) -> Result<bool, SyncError> {
    let Some(head) = project.pending_merges.first().cloned() else {
        return Ok(true);
    };
    let Some(mut push) = ctx.store.get::<Push>(head.as_str())? else {
        warn!(project = %project.key, push = %head, "pending merge has no stored push, dropping it");
        project.pending_merges.remove(0);
        return Ok(false);
    };

    let org = ctx.config.fork_org.as_str();
    let repo = project.repo_name().to_owned();
    let target = push.target().clone();

    let Some(commit) = cherry_pick(ctx, org, &repo, &target).or_else(|| merge(ctx, org, &repo, &target))
    else {
        error!(project = %project.key, push = %head, "failed to fold upstream changeset into fork");
        return Ok(false);
    };

    info!(project = %project.key, push = %head, commit = %commit, "upstream changeset applied to fork");
    push.fork_merge = Some(commit);
    ctx.store.put(&push)?;
    project.pending_merges.remove(0);
    Ok(true)
}

fn cherry_pick(ctx: &Context<'_>, org: &str, repo: &str, sha: &Sha1) -> Option<Sha1> {
    info!(sha = %sha, "cherry-picking upstream changeset into {org}/{repo}");
    match ctx.source.cherry_pick(org, repo, sha, true) {
        Ok(Some(commit)) => Some(commit),
        Ok(None) => {
            warn!(sha = %sha, "cherry-pick produced no commit, falling back to merge");
            None
        }
        Err(e) => {
            warn!(sha = %sha, error = %e, "cherry-pick failed, falling back to merge");
            None
        }
    }
}

fn merge(ctx: &Context<'_>, org: &str, repo: &str, sha: &Sha1) -> Option<Sha1> {
    match ctx.source.merge(org, repo, sha) {
        Ok(commit) => commit,
        Err(e) => {
            error!(sha = %sha, error = %e, "merge failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
