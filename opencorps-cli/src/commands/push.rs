//! `opencorps push <owner/repo> <payload.json>`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use opencorps_core::ProjectKey;
use opencorps_sync::{ingest_push, PushNotification, PushOutcome};

use super::open_store;

/// Record an upstream push notification for a project.
#[derive(Args, Debug)]
pub struct PushArgs {
    /// Project the push belongs to, as `owner/repo`.
    pub project: ProjectKey,

    /// Push webhook payload (JSON).
    pub payload: PathBuf,
}

impl PushArgs {
    pub fn run(self) -> Result<()> {
        let body = std::fs::read_to_string(&self.payload)
            .with_context(|| format!("cannot read '{}'", self.payload.display()))?;
        let note: PushNotification = serde_json::from_str(&body)
            .with_context(|| format!("'{}' is not a push payload", self.payload.display()))?;

        let store = open_store()?;
        let (outcome, project) = ingest_push(&store, &self.project, &note)
            .with_context(|| format!("failed to record push {}", note.after))?
            .with_context(|| format!("unknown project '{}'; run `opencorps init` first", self.project))?;

        match outcome {
            PushOutcome::Recorded => {
                println!(
                    "✓ Queued {} for '{}' ({} pending)",
                    note.after.short(),
                    project.key,
                    project.pending_merges.len()
                );
            }
            PushOutcome::Redelivered => {
                println!("Push {} already recorded for '{}'", note.after.short(), project.key);
            }
            PushOutcome::Rejected(reason) => bail!("push rejected: {reason}"),
        }
        Ok(())
    }
}
