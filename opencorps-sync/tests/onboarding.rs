//! Onboarding driven end to end against the in-memory collaborators.

use opencorps_core::{
    CiLink, ForkConfig, Progress, Project, ProjectKey, Push, Sha1, StoreExt, UserConfig,
    CI_CONFIG_FILE, USER_CONFIG_FILE,
};
use opencorps_sync::fakes::Fixture;
use opencorps_sync::ingest::{locate_push, record_push};
use opencorps_sync::{advance, register_project, PushNotification, PushRepository, Stage, SyncError};

const DOC: &str = "\
schema_version: [1]
simulation:
  fusesoc_vunit: [uart]
synthesis:
  fusesoc: [uart]
  targets: [xilinx]
";

fn key() -> ProjectKey {
    ProjectKey::new("chiggs", "uart").unwrap()
}

fn webhooked() -> Project {
    let mut p = Project::new(key());
    p.progress.has_webhook = true;
    p
}

/// Call `advance` until it reports done, persisting after every call.
fn drive(fx: &Fixture, project: &mut Project) -> usize {
    for round in 1..=32 {
        let done = advance(&fx.ctx(), project).expect("advance");
        fx.store.put(&*project).expect("persist");
        if done {
            return round;
        }
    }
    panic!("project did not finish onboarding: {:?}", project.progress);
}

#[test]
fn three_call_scenario() {
    let fx = Fixture::new().unwrap();
    fx.source.put_file("chiggs", "uart", "README.md", "uart\n");
    let mut p = webhooked();

    assert!(!advance(&fx.ctx(), &mut p).unwrap());
    assert!(p.progress.forked);

    assert!(!advance(&fx.ctx(), &mut p).unwrap());
    assert_eq!(p.failure_count, 1);
    assert!(!p.progress.user_config_present());

    fx.source.put_file("chiggs", "uart", USER_CONFIG_FILE, DOC);
    assert!(!advance(&fx.ctx(), &mut p).unwrap());
    assert!(p.progress.user_config_present());
    assert_eq!(p.failure_count, 0);
}

#[test]
fn registration_through_completion_and_upstream_update() {
    let fx = Fixture::new().unwrap();
    fx.source.put_file("chiggs", "uart", USER_CONFIG_FILE, DOC);
    fx.ci.ready_for("OpenCorps", "uart");

    let mut p = register_project(&fx.ctx(), key(), "UART core").unwrap();
    let upstream_head = fx.source.state().head("chiggs", "uart").unwrap();

    assert_eq!(drive(&fx, &mut p), 6);
    assert!(p.progress.init_complete);
    assert_eq!(p.failure_count, 0);
    assert_eq!(p.tags, vec!["fusesoc", "vunit", "vivado"]);

    let first_ci_commit = fx.source.state().head("OpenCorps", "uart").unwrap();
    let origin: Push = fx.store.get(upstream_head.as_str()).unwrap().unwrap();
    assert_eq!(origin.ci_update, Some(first_ci_commit.clone()));
    assert_eq!(fx.ci.state().enabled, vec![1]);
    assert_eq!(fx.ci.state().settings.len(), 1);

    // Upstream switches synthesis target.
    fx.source
        .put_file("chiggs", "uart", USER_CONFIG_FILE, &DOC.replace("[xilinx]", "[altera]"));
    let after = fx.source.state().head("chiggs", "uart").unwrap();
    let note = PushNotification {
        ref_name: "refs/heads/master".into(),
        before: upstream_head,
        after: after.clone(),
        compare: None,
        repository: PushRepository {
            full_name: "chiggs/uart".into(),
        },
    };
    assert!(record_push(&fx.store, &mut p, &note).unwrap().needs_advance());
    assert_eq!(Stage::next(&p), Stage::ApplyMerge { head: after.clone() });

    assert_eq!(drive(&fx, &mut p), 3);
    assert!(p.pending_merges.is_empty());
    assert!(p.tags.contains(&"quartus".to_owned()));

    let state = fx.source.state();
    assert_eq!(state.commits.len(), 2);
    assert_eq!(state.commits[1].message, "Updating .travis.yml from .opencorps.yml");
    assert!(state
        .file("OpenCorps", "uart", CI_CONFIG_FILE)
        .unwrap()
        .contains("--tool=quartus"));
    let ci_commit = state.head("OpenCorps", "uart").unwrap();
    drop(state);

    let push: Push = fx.store.get(after.as_str()).unwrap().unwrap();
    assert!(push.fork_merge.is_some());
    assert_eq!(push.ci_update, Some(ci_commit.clone()));
    assert_eq!(locate_push(&fx.store, &ci_commit).unwrap().map(|p| p.id), Some(after));
}

#[test]
fn failing_step_is_idempotent() {
    let fx = Fixture::new().unwrap();
    fx.source.state().fail_fork = true;
    let mut p = webhooked();

    advance(&fx.ctx(), &mut p).unwrap();
    let (progress, failures) = (p.progress.clone(), p.failure_count);
    advance(&fx.ctx(), &mut p).unwrap();

    assert_eq!(p.progress, progress);
    assert_eq!(p.failure_count, failures + 1);
}

#[test]
fn repeated_failures_end_in_abort() {
    let fx = Fixture::new().unwrap();
    fx.source.state().fail_fork = true;
    let mut p = webhooked();

    for _ in 0..21 {
        assert!(!advance(&fx.ctx(), &mut p).unwrap());
    }
    assert_eq!(p.failure_count, 21);
    assert!(matches!(
        advance(&fx.ctx(), &mut p),
        Err(SyncError::Abort { failures: 21 })
    ));
}

#[test]
fn webhook_failure_blocks_onboarding() {
    let fx = Fixture::new().unwrap();
    fx.source.state().fail_webhook = true;
    let mut p = register_project(&fx.ctx(), key(), "").unwrap();

    assert!(matches!(
        advance(&fx.ctx(), &mut p),
        Err(SyncError::MissingWebhook(_))
    ));
    assert!(fx.source.state().forks.is_empty());
}

/// Every reachable combination of progress flags picks a step whose
/// predecessors are all satisfied.
#[test]
fn steps_never_run_out_of_order() {
    let user = [UserConfig::Unchecked, UserConfig::Absent, UserConfig::Present];
    let fork = [ForkConfig::Unchecked, ForkConfig::Valid, ForkConfig::Invalid];
    let ci = [CiLink::Unrequested, CiLink::SyncRequested, CiLink::HookEnabled];
    let sha: Sha1 = "a".repeat(40).parse().unwrap();

    for bits in 0..16u8 {
        for u in user {
            for f in fork {
                for c in ci {
                    let mut p = webhooked();
                    p.progress = Progress {
                        has_webhook: bits & 1 != 0,
                        forked: bits & 2 != 0,
                        user_config: u,
                        fork_config: f,
                        fork_ci_config_committed: bits & 4 != 0,
                        ci: c,
                        init_complete: false,
                    };
                    if bits & 8 != 0 {
                        p.pending_merges.push(sha.clone());
                    }
                    check_order(&p);
                }
            }
        }
    }
}

fn check_order(p: &Project) {
    let g = &p.progress;
    let stage = Stage::next(p);
    let ready = match stage {
        Stage::RegisterWebhook => true,
        Stage::Fork => g.has_webhook,
        Stage::CheckUserConfig => g.has_webhook && g.forked,
        Stage::ApplyMerge { .. } => g.has_webhook && g.forked && g.user_config_present(),
        Stage::ValidateForkConfig => {
            g.has_webhook && g.forked && g.user_config_present() && p.pending_merges.is_empty()
        }
        Stage::RequestCiSync | Stage::EnableCiHook | Stage::CommitCiConfig | Stage::Finalize => {
            g.has_webhook
                && g.forked
                && g.user_config_present()
                && p.pending_merges.is_empty()
                && g.fork_config_valid()
        }
    };
    assert!(ready, "{stage} chosen for {g:?}");
    if stage == Stage::CommitCiConfig || stage == Stage::Finalize {
        assert!(g.ci_webhook_enabled(), "{stage} chosen before CI hook for {g:?}");
    }
}
