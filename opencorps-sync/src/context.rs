//! Everything a step needs, borrowed for the duration of one call.

use serde_json::{json, Map, Value};

use opencorps_core::{CorpsConfig, ObjectStore, Project};
use opencorps_renderer::Renderer;

use crate::clients::{CiHost, Notifier, SourceHost};

/// Event name for project status pushes.
pub const STATUS_EVENT: &str = "update_status";

/// Collaborators and configuration for one unit of work.
pub struct Context<'a> {
    pub config: &'a CorpsConfig,
    pub store: &'a dyn ObjectStore,
    pub source: &'a dyn SourceHost,
    pub ci: &'a dyn CiHost,
    pub notifier: &'a dyn Notifier,
    pub renderer: &'a Renderer,
}

impl Context<'_> {
    /// Publish the project's current progress on its live-update channel.
    pub fn update_status(&self, project: &Project) {
        self.notifier
            .publish(&project.key.channel(), STATUS_EVENT, &status_payload(project));
    }
}

/// JSON body sent with [`STATUS_EVENT`].
pub fn status_payload(project: &Project) -> Value {
    let flags: Map<String, Value> = project
        .progress
        .flags()
        .iter()
        .map(|(name, set)| ((*name).to_owned(), Value::Bool(*set)))
        .collect();
    json!({
        "project": project.key.as_str(),
        "flags": flags,
        "failure_count": project.failure_count,
        "system_message": project.system_message,
        "pending_merges": project.pending_merges.len(),
    })
}
