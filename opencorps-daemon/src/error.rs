use thiserror::Error;

use opencorps_core::{ProjectKey, StoreError};
use opencorps_renderer::RenderError;
use opencorps_sync::SyncError;

/// Error surface for the scheduler and daemon runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("template error: {0}")]
    Render(#[from] RenderError),

    #[error("unknown project {0}")]
    UnknownProject(ProjectKey),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },
}
