//! Collaborator interfaces: source host, CI host and the live-update sink.
//!
//! Implementations own their wire format and authentication. All calls are
//! blocking; the daemon runs them on the blocking pool under a timeout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use opencorps_core::{Secret, Sha1};

use crate::error::ClientError;

/// Repository hosting provider, acting as the fork organisation's account.
pub trait SourceHost: Send + Sync {
    /// Fork `owner/repo` into `target_org`.
    fn fork(&self, owner: &str, repo: &str, target_org: &str) -> Result<(), ClientError>;

    /// SHA at the tip of the default branch.
    fn head(&self, owner: &str, repo: &str) -> Result<Sha1, ClientError>;

    /// Contents of `path` on the default branch, `None` if it does not exist.
    fn get_file(&self, owner: &str, repo: &str, path: &str) -> Result<Option<String>, ClientError>;

    /// Create or replace `path`. Returns false if the host refused the commit.
    fn commit_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        contents: &str,
        message: &str,
    ) -> Result<bool, ClientError>;

    /// Cherry-pick `sha` onto the default branch. `None` means no commit was
    /// produced.
    fn cherry_pick(
        &self,
        owner: &str,
        repo: &str,
        sha: &Sha1,
        force: bool,
    ) -> Result<Option<Sha1>, ClientError>;

    /// Merge `sha` into the default branch.
    fn merge(&self, owner: &str, repo: &str, sha: &Sha1) -> Result<Option<Sha1>, ClientError>;

    /// Register a push webhook posting to `url`, signed with `secret`.
    fn create_webhook(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
        secret: &Secret,
    ) -> Result<(), ClientError>;
}

/// A repository hook as listed by the CI provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiHook {
    pub id: u64,
    pub name: String,
    pub owner_name: String,
    pub active: bool,
}

/// A repository as known to the CI provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiRepo {
    pub id: u64,
    pub slug: String,
}

/// Build filter applied to the fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiSettings {
    pub builds_only_with_ci_config: bool,
    pub build_pushes: bool,
    pub build_pull_requests: bool,
}

impl CiSettings {
    /// Build pushes only, skip pull requests, require a CI config file.
    pub fn push_only() -> Self {
        Self {
            builds_only_with_ci_config: true,
            build_pushes: true,
            build_pull_requests: false,
        }
    }
}

/// Build section of a CI provider build payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub repository_id: u64,
    pub number: String,
    pub state: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub pull_request: Option<bool>,
    #[serde(default)]
    pub job_ids: Vec<u64>,
}

/// One job inside a CI provider build payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: u64,
    pub build_id: u64,
    #[serde(default)]
    pub log_id: Option<u64>,
    pub number: String,
    pub state: String,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// `build + jobs` payload returned by [`CiHost::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPayload {
    pub build: BuildInfo,
    #[serde(default)]
    pub jobs: Vec<JobInfo>,
}

/// Continuous-integration provider.
pub trait CiHost: Send + Sync {
    /// Ask the provider to re-read the account's repositories.
    fn sync(&self, block: bool) -> Result<(), ClientError>;

    fn is_synced(&self) -> Result<bool, ClientError>;

    fn hooks(&self) -> Result<Vec<CiHook>, ClientError>;

    fn repo(&self, org: &str, name: &str) -> Result<CiRepo, ClientError>;

    fn enable_hook(&self, id: u64) -> Result<(), ClientError>;

    /// Returns false if the provider rejected the settings.
    fn update_settings(&self, repo_id: u64, settings: &CiSettings) -> Result<bool, ClientError>;

    /// Encrypt `plaintext` with the repository's public key.
    fn encrypt(&self, org: &str, repo: &str, plaintext: &str) -> Result<String, ClientError>;

    fn build(&self, id: u64) -> Result<BuildPayload, ClientError>;
}

/// Live status updates for anyone watching a project page. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn publish(&self, channel: &str, event: &str, payload: &Value);
}

/// Notifier that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn publish(&self, channel: &str, event: &str, _payload: &Value) {
        tracing::trace!(channel, event, "status update dropped");
    }
}
