//! Creating a project and its inbound push webhook.

use tracing::{error, info};

use opencorps_core::{Project, ProjectKey, StoreExt};

use crate::context::Context;
use crate::error::SyncError;

/// URL the source host posts push notifications to for `key`.
pub fn webhook_url(base_url: &str, key: &ProjectKey) -> String {
    format!("{}/{}/commit", base_url.trim_end_matches('/'), key)
}

/// Create `key` if it does not exist and make sure it has a webhook.
///
/// An existing project keeps its stored secret; the webhook is only created
/// when the stored project does not have one yet. A webhook failure is
/// recorded in `system_message` and leaves `has_webhook` unset.
pub fn register_project(
    ctx: &Context<'_>,
    key: ProjectKey,
    description: &str,
) -> Result<Project, SyncError> {
    let mut fresh = Project::new(key);
    fresh.description = description.to_owned();
    let mut project = ctx.store.insert(fresh)?;
    if project.progress.has_webhook {
        info!(project = %project.key, "project already registered");
        return Ok(project);
    }

    let url = webhook_url(&ctx.config.webhook_base_url, &project.key);
    match ctx
        .source
        .create_webhook(project.key.owner(), project.repo_name(), &url, &project.secret)
    {
        Ok(()) => {
            info!(project = %project.key, url = %url, "created push webhook");
            project.progress.has_webhook = true;
            project.system_message.clear();
        }
        Err(e) => {
            error!(project = %project.key, error = %e, "failed to create push webhook");
            project.system_message = format!("Failed to create webhook: {e}");
        }
    }
    ctx.store.put(&project)?;
    ctx.update_status(&project);
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::Fixture;

    fn key() -> ProjectKey {
        ProjectKey::new("chiggs", "uart").unwrap()
    }

    #[test]
    fn webhook_url_has_no_double_slash() {
        assert_eq!(
            webhook_url("https://theopencorps.org/", &key()),
            "https://theopencorps.org/chiggs/uart/commit"
        );
    }

    #[test]
    fn registers_webhook_with_project_secret() {
        let fx = Fixture::new().unwrap();
        let p = register_project(&fx.ctx(), key(), "A UART").unwrap();

        assert!(p.progress.has_webhook);
        assert_eq!(p.description, "A UART");
        let state = fx.source.state();
        assert_eq!(state.webhooks.len(), 1);
        assert_eq!(state.webhooks[0].url, "https://theopencorps.org/chiggs/uart/commit");
        assert_eq!(state.webhooks[0].secret, p.secret.expose());
    }

    #[test]
    fn second_registration_keeps_secret_and_skips_webhook() {
        let fx = Fixture::new().unwrap();
        let first = register_project(&fx.ctx(), key(), "").unwrap();
        let second = register_project(&fx.ctx(), key(), "").unwrap();

        assert_eq!(first.secret, second.secret);
        assert_eq!(fx.source.state().webhooks.len(), 1);
    }

    #[test]
    fn webhook_failure_is_recorded_and_retried() {
        let fx = Fixture::new().unwrap();
        fx.source.state().fail_webhook = true;
        let p = register_project(&fx.ctx(), key(), "").unwrap();
        assert!(!p.progress.has_webhook);
        assert!(p.system_message.starts_with("Failed to create webhook"));

        fx.source.state().fail_webhook = false;
        let p = register_project(&fx.ctx(), key(), "").unwrap();
        assert!(p.progress.has_webhook);
        assert!(p.system_message.is_empty());
    }
}
