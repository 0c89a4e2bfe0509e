//! Error types for opencorps-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from object store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the file that failed.
    #[error("failed to parse record at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A stored record did not match the shape of the requested entity.
    #[error("record {kind}/{key} has unexpected shape: {source}")]
    Decode {
        kind: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// An entity could not be converted to a storable value.
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Keys map onto path components, so traversal segments are refused.
    #[error("invalid store key '{0}'")]
    InvalidKey(String),

    /// The store's transaction lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// `dirs::home_dir()` returned `None`, so `~/.opencorps/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Validation errors for domain newtypes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid commit SHA '{0}': expected 40 lower-case hex characters")]
    InvalidSha(String),

    #[error("invalid project key '{0}': expected 'owner/repo'")]
    InvalidProjectKey(String),

    #[error("invalid secret: expected 40 hex characters")]
    InvalidSecret,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
