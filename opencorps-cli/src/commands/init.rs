//! `opencorps init <owner/repo> [--description ...] [--tag ...] [--webhook-registered]`

use anyhow::{Context, Result};
use clap::Args;

use opencorps_core::{Entity, Project, ProjectKey, StoreExt};

use super::open_store;

/// Register a project in the local store.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Upstream repository as `owner/repo`.
    pub project: ProjectKey,

    /// Free-text project description.
    #[arg(long, short = 'd')]
    pub description: Option<String>,

    /// Tag to attach; may be repeated.
    #[arg(long = "tag", short = 't', value_name = "TAG")]
    pub tags: Vec<String>,

    /// Mark the upstream webhook as already created, so onboarding can start.
    #[arg(long)]
    pub webhook_registered: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let store = open_store()?;

        let mut project = Project::new(self.project.clone());
        if let Some(description) = self.description {
            project.description = description;
        }
        for tag in &self.tags {
            project.add_tag(tag);
        }
        project.progress.has_webhook = self.webhook_registered;

        let stored = store
            .insert_or_update(project)
            .with_context(|| format!("failed to register '{}'", self.project))?;
        let path = store.record_path(Project::KIND, &stored.key())?;

        println!("✓ Registered '{}'", stored.key);
        println!("  Saved to: {}", path.display());
        if !stored.progress.has_webhook {
            println!("  No webhook yet: onboarding will not start until one is registered.");
        }
        Ok(())
    }
}
