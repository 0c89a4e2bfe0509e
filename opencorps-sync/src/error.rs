//! Error types for opencorps-sync.

use thiserror::Error;

use opencorps_core::{ProjectKey, StoreError};
use opencorps_renderer::RenderError;

/// Failure reported by a source-host or CI-host client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The remote API answered with an error status.
    #[error("{operation} failed with status {status}: {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The request never got an answer (network, timeout).
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
}

impl ClientError {
    pub fn api(operation: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            status,
            message: message.into(),
        }
    }
}

/// Problems with a JUnit XML report.
#[derive(Debug, Error)]
pub enum JunitError {
    #[error("invalid XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("expected a testsuite root element, found <{0}>")]
    UnexpectedRoot(String),

    #[error("expected exactly one testsuite, found {0}")]
    SuiteCount(usize),

    #[error("attribute {name}=\"{value}\" is not a number")]
    BadAttribute { name: &'static str, value: String },
}

/// All errors that can arise from advancing or ingesting.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Too many consecutive failures; automatic retries stop here.
    #[error("giving up after {failures} failures")]
    Abort { failures: u32 },

    /// The project has no inbound webhook; nothing can proceed.
    #[error("can't continue - no webhook for project {0}")]
    MissingWebhook(ProjectKey),

    /// A CI callback arrived without build/job identifiers.
    #[error("no CI build information in callback")]
    MissingBuildInfo,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("test report error: {0}")]
    Junit(#[from] JunitError),
}
