//! The onboarding transition table.
//!
//! A project's next step is a pure function of its progress flags and its
//! pending-merge queue. Rules are tried in order; the first that matches
//! wins. When none match, the project is finalized.

use std::fmt;

use opencorps_core::{Project, Sha1};

/// One unit of onboarding work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// No webhook: cannot proceed.
    RegisterWebhook,
    Fork,
    CheckUserConfig,
    /// Fold the oldest pending upstream push into the fork.
    ApplyMerge { head: Sha1 },
    ValidateForkConfig,
    RequestCiSync,
    EnableCiHook,
    CommitCiConfig,
    Finalize,
}

type Rule = fn(&Project) -> Option<Stage>;

const TRANSITIONS: &[Rule] = &[
    |p| (!p.progress.has_webhook).then_some(Stage::RegisterWebhook),
    |p| (!p.progress.forked).then_some(Stage::Fork),
    |p| (!p.progress.user_config_present()).then_some(Stage::CheckUserConfig),
    |p| {
        p.pending_merges
            .first()
            .map(|head| Stage::ApplyMerge { head: head.clone() })
    },
    |p| (!p.progress.fork_config_valid()).then_some(Stage::ValidateForkConfig),
    |p| (!p.progress.ci_sync_requested()).then_some(Stage::RequestCiSync),
    |p| (!p.progress.ci_webhook_enabled()).then_some(Stage::EnableCiHook),
    |p| (!p.progress.fork_ci_config_committed).then_some(Stage::CommitCiConfig),
];

impl Stage {
    /// The step `advance` would run for `project` right now.
    pub fn next(project: &Project) -> Stage {
        TRANSITIONS
            .iter()
            .find_map(|rule| rule(project))
            .unwrap_or(Stage::Finalize)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::RegisterWebhook => "register-webhook",
            Stage::Fork => "fork",
            Stage::CheckUserConfig => "check-user-config",
            Stage::ApplyMerge { .. } => "apply-merge",
            Stage::ValidateForkConfig => "validate-fork-config",
            Stage::RequestCiSync => "request-ci-sync",
            Stage::EnableCiHook => "enable-ci-hook",
            Stage::CommitCiConfig => "commit-ci-config",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::ApplyMerge { head } => write!(f, "apply-merge({})", head.short()),
            other => f.write_str(other.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use opencorps_core::{CiLink, ForkConfig, ProjectKey, UserConfig};
    use rstest::rstest;

    fn sha(c: char) -> Sha1 {
        c.to_string().repeat(40).parse().unwrap()
    }

    fn project() -> Project {
        Project::new(ProjectKey::new("chiggs", "uart").unwrap())
    }

    fn onboarded() -> Project {
        let mut p = project();
        p.progress.has_webhook = true;
        p.progress.forked = true;
        p.progress.user_config = UserConfig::Present;
        p.progress.fork_config = ForkConfig::Valid;
        p.progress.ci = CiLink::HookEnabled;
        p.progress.fork_ci_config_committed = true;
        p
    }

    #[test]
    fn fresh_project_needs_webhook_first() {
        assert_eq!(Stage::next(&project()), Stage::RegisterWebhook);
    }

    #[rstest]
    #[case::fork(|p: &mut Project| p.progress.forked = false, "fork")]
    #[case::absent(|p: &mut Project| p.progress.user_config = UserConfig::Absent, "check-user-config")]
    #[case::unchecked(|p: &mut Project| p.progress.user_config = UserConfig::Unchecked, "check-user-config")]
    #[case::invalid(|p: &mut Project| p.progress.fork_config = ForkConfig::Invalid, "validate-fork-config")]
    #[case::sync(|p: &mut Project| p.progress.ci = CiLink::Unrequested, "request-ci-sync")]
    #[case::hook(|p: &mut Project| p.progress.ci = CiLink::SyncRequested, "enable-ci-hook")]
    #[case::commit(|p: &mut Project| p.progress.fork_ci_config_committed = false, "commit-ci-config")]
    fn single_missing_flag_selects_its_step(#[case] unset: fn(&mut Project), #[case] expected: &str) {
        let mut p = onboarded();
        unset(&mut p);
        assert_eq!(Stage::next(&p).name(), expected);
    }

    #[test]
    fn fully_onboarded_project_finalizes() {
        assert_eq!(Stage::next(&onboarded()), Stage::Finalize);
    }

    #[test]
    fn pending_merge_comes_before_fork_validation() {
        let mut p = onboarded();
        p.progress.reset_fork_state();
        p.pending_merges = vec![sha('a'), sha('b')];
        assert_eq!(Stage::next(&p), Stage::ApplyMerge { head: sha('a') });
    }

    #[test]
    fn pending_merge_waits_for_user_config() {
        let mut p = onboarded();
        p.progress.user_config = UserConfig::Absent;
        p.pending_merges = vec![sha('a')];
        assert_eq!(Stage::next(&p), Stage::CheckUserConfig);
    }

    #[test]
    fn display_shows_short_head() {
        let stage = Stage::ApplyMerge { head: sha('c') };
        assert_eq!(stage.to_string(), "apply-merge(ccccccc)");
    }
}
