//! Error types for opencorps-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from template rendering operations.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error while loading user templates.
    #[error("template io error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// Problems with a user configuration document.
///
/// These are never retried automatically: the document has to change first.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreFileError {
    /// The document is not parsable YAML.
    #[error("failed to parse YML file: {0}")]
    Syntax(String),

    /// The document parsed but does not match the supported schema.
    #[error("schema error: {0}")]
    Schema(String),
}
