//! Generating and committing the fork's CI pipeline file.

use tracing::{debug, error, info, warn};

use opencorps_core::{
    ForkConfig, ObjectStore, Project, Push, Sha1, StoreError, StoreExt, CI_CONFIG_FILE,
    USER_CONFIG_FILE,
};
use opencorps_renderer::{same_ignoring_secure, CiContext, CoreFile};

use crate::context::Context;
use crate::error::{ClientError, SyncError};

/// Render the CI config from the fork's `.opencorps.yml` and commit it if it
/// differs from what the fork already has, ignoring encrypted lines.
///
/// Returns false on any recoverable failure. The committed flag is set when
/// the fork ends up with an up-to-date config.
pub fn commit_ci_config(ctx: &Context<'_>, project: &mut Project) -> Result<bool, SyncError> {
    let org = ctx.config.fork_org.clone();
    let repo = project.repo_name().to_owned();

    let text = match ctx.source.get_file(&org, &repo, USER_CONFIG_FILE) {
        Ok(Some(text)) => text,
        Ok(None) => {
            warn!(project = %project.key, "fork has no {USER_CONFIG_FILE}, cannot generate CI config");
            return Ok(false);
        }
        Err(e) => {
            warn!(project = %project.key, error = %e, "could not fetch fork {USER_CONFIG_FILE}");
            return Ok(false);
        }
    };
    let core = match CoreFile::parse(&text) {
        Ok(core) => core,
        Err(e) => {
            warn!(project = %project.key, error = %e, "fork {USER_CONFIG_FILE} became invalid");
            project.progress.fork_config = ForkConfig::Invalid;
            project.system_message = e.to_string();
            return Ok(false);
        }
    };

    let secure = match encrypt_secure_variables(ctx, project, &org, &repo) {
        Ok(secure) => secure,
        Err(e) => {
            error!(project = %project.key, error = %e, "failed to encrypt secure variables");
            return Ok(false);
        }
    };

    let vars = core.template_vars();
    for tag in vars.tags() {
        project.add_tag(tag);
    }
    let context = CiContext::new(&project.key, &ctx.config.webhook_base_url, &vars, secure);
    let contents = ctx.renderer.render(&context)?;

    let existing = match ctx.source.get_file(&org, &repo, CI_CONFIG_FILE) {
        Ok(existing) => existing,
        Err(e) => {
            warn!(project = %project.key, error = %e, "could not fetch fork {CI_CONFIG_FILE}");
            return Ok(false);
        }
    };
    if let Some(current) = existing.as_deref() {
        if same_ignoring_secure(current, &contents) {
            info!(project = %project.key, "{CI_CONFIG_FILE} is up to date, no commit needed");
            project.progress.fork_ci_config_committed = true;
            return Ok(true);
        }
    }

    let before = match ctx.source.head(&org, &repo) {
        Ok(sha) => sha,
        Err(e) => {
            warn!(project = %project.key, error = %e, "could not read fork head");
            return Ok(false);
        }
    };
    let message = if existing.is_none() {
        format!("Add OpenCorps {CI_CONFIG_FILE} to repository")
    } else {
        format!("Updating {CI_CONFIG_FILE} from {USER_CONFIG_FILE}")
    };

    let committed = match ctx
        .source
        .commit_file(&org, &repo, CI_CONFIG_FILE, &contents, &message)
    {
        Ok(committed) => committed,
        Err(e) => {
            error!(project = %project.key, error = %e, "commit of {CI_CONFIG_FILE} failed");
            false
        }
    };
    project.progress.fork_ci_config_committed = committed;
    if !committed {
        error!(project = %project.key, "source host refused {CI_CONFIG_FILE} commit");
        return Ok(false);
    }
    info!(project = %project.key, "{message}");

    match ctx.source.head(&org, &repo) {
        Ok(after) => {
            record_ci_update(ctx.store, &before, after)?;
            if let Err(e) = ctx.ci.sync(false) {
                warn!(project = %project.key, error = %e, "CI sync after config commit failed");
            }
        }
        Err(e) => warn!(project = %project.key, error = %e, "committed but could not read new fork head"),
    }
    Ok(true)
}

/// The configured secure variables plus the project's message token, each
/// encrypted with the fork's CI key.
fn encrypt_secure_variables(
    ctx: &Context<'_>,
    project: &Project,
    org: &str,
    repo: &str,
) -> Result<Vec<String>, ClientError> {
    let token = format!("'MSG_TOKEN={}'", project.secret.expose());
    let mut out = Vec::with_capacity(ctx.config.secure_variables.len() + 1);
    for plaintext in ctx.config.secure_variables.iter().chain(std::iter::once(&token)) {
        out.push(ctx.ci.encrypt(org, repo, plaintext)?);
    }
    debug!(project = %project.key, count = out.len(), "encrypted secure variables");
    Ok(out)
}

/// Point the push that produced `before` at the CI commit `after`. Looks the
/// push up by id first, then by the fork commit it was merged as.
fn record_ci_update(store: &dyn ObjectStore, before: &Sha1, after: Sha1) -> Result<(), StoreError> {
    let push = match store.get::<Push>(before.as_str())? {
        Some(push) => Some(push),
        None => store
            .query::<Push>(|p| p.fork_merge.as_ref() == Some(before))?
            .into_iter()
            .next(),
    };
    match push {
        Some(mut push) => {
            debug!(push = %push.id, ci_update = %after, "tracking CI config commit");
            push.ci_update = Some(after);
            store.put(&push)
        }
        None => {
            warn!(before = %before, "no push tracks the fork head before the CI config commit");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::Fixture;
    use opencorps_core::ProjectKey;

    const DOC: &str = "\
schema_version: [1]
simulation:
  fusesoc_vunit: [uart]
synthesis:
  fusesoc: [uart]
  targets: [xilinx]
";

    fn fixture() -> (Fixture, Project) {
        let fx = Fixture::new().unwrap();
        fx.source.put_file("OpenCorps", "uart", USER_CONFIG_FILE, DOC);
        let p = Project::new(ProjectKey::new("chiggs", "uart").unwrap());
        (fx, p)
    }

    #[test]
    fn first_commit_adds_config_and_tags() {
        let (fx, mut p) = fixture();
        assert!(commit_ci_config(&fx.ctx(), &mut p).unwrap());
        assert!(p.progress.fork_ci_config_committed);
        assert_eq!(p.tags, vec!["fusesoc", "vunit", "vivado"]);

        let state = fx.source.state();
        assert_eq!(state.commits.len(), 1);
        assert_eq!(state.commits[0].message, "Add OpenCorps .travis.yml to repository");
        let written = state.file("OpenCorps", "uart", CI_CONFIG_FILE).unwrap();
        assert!(written.contains("- CORE=uart"));
        assert!(!written.contains(p.secret.expose()));
    }

    #[test]
    fn unchanged_config_is_not_recommitted() {
        let (fx, mut p) = fixture();
        assert!(commit_ci_config(&fx.ctx(), &mut p).unwrap());
        p.progress.fork_ci_config_committed = false;

        // Encryption is non-deterministic, so the second render differs only
        // in secure lines.
        assert!(commit_ci_config(&fx.ctx(), &mut p).unwrap());
        assert!(p.progress.fork_ci_config_committed);
        assert_eq!(fx.source.state().commits.len(), 1);
    }

    #[test]
    fn changed_document_commits_an_update() {
        let (fx, mut p) = fixture();
        assert!(commit_ci_config(&fx.ctx(), &mut p).unwrap());
        fx.source
            .put_file("OpenCorps", "uart", USER_CONFIG_FILE, &DOC.replace("[xilinx]", "[altera]"));

        assert!(commit_ci_config(&fx.ctx(), &mut p).unwrap());
        let state = fx.source.state();
        assert_eq!(state.commits.len(), 2);
        assert_eq!(state.commits[1].message, "Updating .travis.yml from .opencorps.yml");
    }

    #[test]
    fn refused_commit_is_a_failure() {
        let (fx, mut p) = fixture();
        fx.source.state().refuse_commits = true;
        assert!(!commit_ci_config(&fx.ctx(), &mut p).unwrap());
        assert!(!p.progress.fork_ci_config_committed);
    }

    #[test]
    fn encryption_failure_is_a_failure() {
        let (fx, mut p) = fixture();
        fx.ci.state().fail_encrypt = true;
        assert!(!commit_ci_config(&fx.ctx(), &mut p).unwrap());
        assert!(fx.source.state().commits.is_empty());
    }

    #[test]
    fn commit_is_tracked_on_the_merged_push() {
        let (fx, mut p) = fixture();
        let upstream: Sha1 = "1".repeat(40).parse().unwrap();
        let fork_head: Sha1 = "2".repeat(40).parse().unwrap();
        fx.source.set_head("OpenCorps", "uart", fork_head.clone());
        let mut push = Push::at(upstream.clone());
        push.fork_merge = Some(fork_head);
        fx.store.put(&push).unwrap();

        assert!(commit_ci_config(&fx.ctx(), &mut p).unwrap());

        let push: Push = fx.store.get(upstream.as_str()).unwrap().unwrap();
        let new_head = fx.source.state().head("OpenCorps", "uart").unwrap();
        assert_eq!(push.ci_update, Some(new_head));
        assert_eq!(fx.ci.state().sync_requests, vec![false]);
    }
}
