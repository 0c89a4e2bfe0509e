//! One step of project onboarding.
//!
//! [`advance`] looks at the persisted [`Progress`](opencorps_core::Progress)
//! of a project, picks the next [`Stage`] and performs it. Every step is
//! gated on the flag it sets, so calling `advance` again after a crash or a
//! duplicate trigger repeats no completed work.
//!
//! The caller owns persistence: `project` is mutated in place and must be
//! written back whether or not the call returned an error.

use tracing::{debug, error, info, warn};

use opencorps_core::{CiLink, ForkConfig, Project, Push, StoreExt, UserConfig, USER_CONFIG_FILE};
use opencorps_renderer::CoreFile;

use crate::ci_config::commit_ci_config;
use crate::clients::CiSettings;
use crate::context::Context;
use crate::error::SyncError;
use crate::reconcile::apply_next;
use crate::stage::Stage;

/// Run the next onboarding step for `project`.
///
/// Returns `Ok(true)` when there is nothing left to retry: either onboarding
/// completed or the fork's config file is invalid and needs a new upstream
/// push. `Ok(false)` means call again.
pub fn advance(ctx: &Context<'_>, project: &mut Project) -> Result<bool, SyncError> {
    if project.failure_count > ctx.config.max_failures {
        error!(project = %project.key, failures = project.failure_count, "too many failures, giving up");
        return Err(SyncError::Abort {
            failures: project.failure_count,
        });
    }

    let stage = Stage::next(project);
    debug!(project = %project.key, %stage, failures = project.failure_count, "advancing");

    match stage {
        Stage::RegisterWebhook => {
            project.failure_count += 1;
            Err(SyncError::MissingWebhook(project.key.clone()))
        }

        Stage::Fork => {
            let forked = create_fork(ctx, project);
            record(project, forked);
            ctx.update_status(project);
            Ok(false)
        }

        Stage::CheckUserConfig => {
            let found = check_user_config(ctx, project);
            record(project, found);
            ctx.update_status(project);
            Ok(false)
        }

        Stage::ApplyMerge { head } => {
            info!(project = %project.key, head = %head, "folding upstream push into fork");
            project.progress.reset_fork_state();
            let merged = apply_next(ctx, project)?;
            record(project, merged);
            Ok(false)
        }

        Stage::ValidateForkConfig => {
            let checked = validate_fork_config(ctx, project);
            record(project, checked);
            ctx.update_status(project);
            Ok(project.progress.fork_config_invalid())
        }

        Stage::RequestCiSync => {
            let requested = request_ci_sync(ctx, project);
            record(project, requested);
            Ok(false)
        }

        Stage::EnableCiHook => {
            let enabled = enable_ci_hook(ctx, project);
            record(project, enabled);
            if enabled {
                ctx.update_status(project);
            }
            Ok(false)
        }

        Stage::CommitCiConfig => {
            if !commit_ci_config(ctx, project)? {
                project.failure_count += 1;
                return Ok(false);
            }
            finalize(ctx, project);
            Ok(true)
        }

        Stage::Finalize => {
            finalize(ctx, project);
            Ok(true)
        }
    }
}

fn record(project: &mut Project, succeeded: bool) {
    if succeeded {
        project.failure_count = 0;
    } else {
        project.failure_count += 1;
    }
}

fn finalize(ctx: &Context<'_>, project: &mut Project) {
    info!(project = %project.key, "onboarding complete");
    project.failure_count = 0;
    project.progress.init_complete = true;
    ctx.update_status(project);
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn create_fork(ctx: &Context<'_>, project: &mut Project) -> bool {
    let owner = project.key.owner().to_owned();
    let name = project.repo_name().to_owned();
    let org = ctx.config.fork_org.as_str();

    if let Err(e) = ctx.source.fork(&owner, &name, org) {
        error!(project = %project.key, error = %e, "fork failed");
        project.system_message = format!("Failed to fork {owner}/{name} into {org}/{name}: {e}");
        return false;
    }
    project.progress.forked = true;
    project.system_message = format!("Successfully forked {owner}/{name} into {org}/{name}");
    info!(project = %project.key, "{}", project.system_message);

    // Track the commit the fork starts from so CI callbacks can find it.
    match ctx.source.head(&owner, &name) {
        Ok(head) => {
            if let Err(e) = ctx.store.insert(Push::at(head)) {
                warn!(project = %project.key, error = %e, "could not record upstream head");
            }
        }
        Err(e) => warn!(project = %project.key, error = %e, "could not read upstream head"),
    }
    true
}

fn check_user_config(ctx: &Context<'_>, project: &mut Project) -> bool {
    let found = match ctx
        .source
        .get_file(project.key.owner(), project.repo_name(), USER_CONFIG_FILE)
    {
        Ok(found) => found.is_some(),
        Err(e) => {
            warn!(project = %project.key, error = %e, "could not fetch {USER_CONFIG_FILE}");
            false
        }
    };

    if found {
        project.progress.user_config = UserConfig::Present;
        project.system_message.clear();
    } else {
        project.progress.user_config = UserConfig::Absent;
        project.system_message = format!(
            "No {USER_CONFIG_FILE} present.  Refer to documentation for how to enable this project"
        );
    }
    found
}

/// Returns true when the fork's config was fetched, whether or not it was
/// valid. The verdict is left in `progress.fork_config`.
fn validate_fork_config(ctx: &Context<'_>, project: &mut Project) -> bool {
    let text = match ctx
        .source
        .get_file(&ctx.config.fork_org, project.repo_name(), USER_CONFIG_FILE)
    {
        Ok(Some(text)) => text,
        Ok(None) => {
            warn!(project = %project.key, "fork has no {USER_CONFIG_FILE}");
            project.system_message = format!("No {USER_CONFIG_FILE} found in the fork");
            return false;
        }
        Err(e) => {
            warn!(project = %project.key, error = %e, "could not fetch fork {USER_CONFIG_FILE}");
            return false;
        }
    };

    match CoreFile::parse(&text) {
        Ok(_) => {
            project.progress.fork_config = ForkConfig::Valid;
        }
        Err(e) => {
            warn!(project = %project.key, error = %e, "fork {USER_CONFIG_FILE} is invalid");
            project.progress.fork_config = ForkConfig::Invalid;
            project.system_message = e.to_string();
        }
    }
    true
}

fn request_ci_sync(ctx: &Context<'_>, project: &mut Project) -> bool {
    match ctx.ci.sync(false) {
        Ok(()) => {
            project.progress.ci = CiLink::SyncRequested;
            true
        }
        Err(e) => {
            warn!(project = %project.key, error = %e, "CI sync request failed");
            false
        }
    }
}

fn enable_ci_hook(ctx: &Context<'_>, project: &mut Project) -> bool {
    let org = ctx.config.fork_org.as_str();
    let name = project.repo_name().to_owned();

    match ctx.ci.is_synced() {
        Ok(true) => {}
        Ok(false) => {
            info!(project = %project.key, "waiting for CI provider to finish syncing");
            return false;
        }
        Err(e) => {
            warn!(project = %project.key, error = %e, "could not query CI sync state");
            return false;
        }
    }

    let hooks = match ctx.ci.hooks() {
        Ok(hooks) => hooks,
        Err(e) => {
            error!(project = %project.key, error = %e, "could not list CI hooks");
            return false;
        }
    };
    let Some(hook) = hooks.iter().find(|h| h.name == name && h.owner_name == org) else {
        error!(project = %project.key, hooks = hooks.len(), "no CI hook for {org}/{name}");
        return false;
    };

    if hook.active {
        info!(project = %project.key, "CI hook for {org}/{name} already enabled");
    } else if let Err(e) = ctx.ci.enable_hook(hook.id) {
        error!(project = %project.key, error = %e, "failed to enable CI hook");
        return false;
    }

    let repo = match ctx.ci.repo(org, &name) {
        Ok(repo) => repo,
        Err(e) => {
            error!(project = %project.key, error = %e, "CI provider does not know {org}/{name}");
            return false;
        }
    };
    match ctx.ci.update_settings(repo.id, &CiSettings::push_only()) {
        Ok(true) => info!(project = %project.key, "updated CI settings for {}", repo.slug),
        Ok(false) => warn!(project = %project.key, "CI provider rejected settings for {}", repo.slug),
        Err(e) => warn!(project = %project.key, error = %e, "failed to update CI settings"),
    }

    project.progress.ci = CiLink::HookEnabled;
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::Fixture;
    use opencorps_core::{ProjectKey, Sha1};

    const DOC: &str = "schema_version: [1]\nsimulation:\n  fusesoc_vunit: [uart]\n";

    fn project() -> Project {
        let mut p = Project::new(ProjectKey::new("chiggs", "uart").unwrap());
        p.progress.has_webhook = true;
        p
    }

    fn sha(c: char) -> Sha1 {
        c.to_string().repeat(40).parse().unwrap()
    }

    #[test]
    fn missing_webhook_is_an_error_and_counts() {
        let fx = Fixture::new().unwrap();
        let mut p = project();
        p.progress.has_webhook = false;
        let err = advance(&fx.ctx(), &mut p).unwrap_err();
        assert!(matches!(err, SyncError::MissingWebhook(_)));
        assert_eq!(p.failure_count, 1);
    }

    #[test]
    fn aborts_once_failures_exceed_limit() {
        let fx = Fixture::new().unwrap();
        let mut p = project();
        p.failure_count = 21;
        let err = advance(&fx.ctx(), &mut p).unwrap_err();
        assert!(matches!(err, SyncError::Abort { failures: 21 }));
        assert!(fx.source.state().forks.is_empty());
    }

    #[test]
    fn exactly_at_limit_still_runs() {
        let fx = Fixture::new().unwrap();
        fx.source.set_head("chiggs", "uart", sha('a'));
        let mut p = project();
        p.failure_count = 20;
        assert!(!advance(&fx.ctx(), &mut p).unwrap());
        assert!(p.progress.forked);
        assert_eq!(p.failure_count, 0);
    }

    #[test]
    fn fork_failure_increments_and_explains() {
        let fx = Fixture::new().unwrap();
        fx.source.state().fail_fork = true;
        let mut p = project();
        assert!(!advance(&fx.ctx(), &mut p).unwrap());
        assert!(!p.progress.forked);
        assert_eq!(p.failure_count, 1);
        assert!(p.system_message.starts_with("Failed to fork chiggs/uart"));
    }

    #[test]
    fn fork_records_upstream_head_and_notifies() {
        let fx = Fixture::new().unwrap();
        fx.source.set_head("chiggs", "uart", sha('a'));
        let mut p = project();
        advance(&fx.ctx(), &mut p).unwrap();

        assert!(fx.store.get::<Push>(sha('a').as_str()).unwrap().is_some());
        let events = fx.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "updates_chiggs_uart");
        assert_eq!(events[0].2["flags"]["forked"], true);
    }

    #[test]
    fn absent_user_config_counts_and_explains() {
        let fx = Fixture::new().unwrap();
        let mut p = project();
        p.progress.forked = true;
        assert!(!advance(&fx.ctx(), &mut p).unwrap());
        assert_eq!(p.progress.user_config, UserConfig::Absent);
        assert_eq!(p.failure_count, 1);
        assert!(p.system_message.contains("No .opencorps.yml present"));
    }

    #[test]
    fn invalid_fork_config_stops_retrying() {
        let fx = Fixture::new().unwrap();
        fx.source.put_file("OpenCorps", "uart", USER_CONFIG_FILE, "bogus: [1]\n");
        let mut p = project();
        p.progress.forked = true;
        p.progress.user_config = UserConfig::Present;

        assert!(advance(&fx.ctx(), &mut p).unwrap());
        assert!(p.progress.fork_config_invalid());
        assert_eq!(p.failure_count, 0);
        assert!(p.system_message.contains("unsupported section bogus"));
        assert!(!p.progress.init_complete);
    }

    #[test]
    fn missing_fork_config_is_a_failure() {
        let fx = Fixture::new().unwrap();
        let mut p = project();
        p.progress.forked = true;
        p.progress.user_config = UserConfig::Present;
        p.failure_count = 3;

        assert!(!advance(&fx.ctx(), &mut p).unwrap());
        assert_eq!(p.progress.fork_config, ForkConfig::Unchecked);
        assert_eq!(p.failure_count, 4);
    }

    #[test]
    fn valid_fork_config_resets_failures() {
        let fx = Fixture::new().unwrap();
        fx.source.put_file("OpenCorps", "uart", USER_CONFIG_FILE, DOC);
        let mut p = project();
        p.progress.forked = true;
        p.progress.user_config = UserConfig::Present;
        p.failure_count = 5;

        assert!(!advance(&fx.ctx(), &mut p).unwrap());
        assert!(p.progress.fork_config_valid());
        assert_eq!(p.failure_count, 0);
    }

    #[test]
    fn unsynced_ci_is_a_failure() {
        let fx = Fixture::new().unwrap();
        let mut p = project();
        p.progress.forked = true;
        p.progress.user_config = UserConfig::Present;
        p.progress.fork_config = ForkConfig::Valid;
        p.progress.ci = CiLink::SyncRequested;

        assert!(!advance(&fx.ctx(), &mut p).unwrap());
        assert_eq!(p.progress.ci, CiLink::SyncRequested);
        assert_eq!(p.failure_count, 1);
    }

    #[test]
    fn settings_rejection_does_not_block_hook() {
        let fx = Fixture::new().unwrap();
        fx.ci.ready_for("OpenCorps", "uart");
        fx.ci.state().reject_settings = true;
        let mut p = project();
        p.progress.forked = true;
        p.progress.user_config = UserConfig::Present;
        p.progress.fork_config = ForkConfig::Valid;
        p.progress.ci = CiLink::SyncRequested;

        assert!(!advance(&fx.ctx(), &mut p).unwrap());
        assert!(p.progress.ci_webhook_enabled());
        assert_eq!(fx.ci.state().enabled, vec![1]);
    }

    #[test]
    fn finalize_is_idempotent() {
        let fx = Fixture::new().unwrap();
        let mut p = project();
        p.progress.forked = true;
        p.progress.user_config = UserConfig::Present;
        p.progress.fork_config = ForkConfig::Valid;
        p.progress.ci = CiLink::HookEnabled;
        p.progress.fork_ci_config_committed = true;

        assert!(advance(&fx.ctx(), &mut p).unwrap());
        assert!(advance(&fx.ctx(), &mut p).unwrap());
        assert!(p.progress.init_complete);
        assert!(fx.source.state().commits.is_empty());
    }
}
