//! Domain types for OpenCorps projects and the records hung off them.
//!
//! Every type here is persisted through [`crate::store`] and is therefore
//! serde-serializable. Identifiers that carry a format (commit SHAs, project
//! keys, secrets) are newtypes validated on construction *and* on
//! deserialization, so a malformed record never reaches the state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ModelError;
use crate::store::Entity;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A git commit SHA: exactly 40 lower-case hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha1(String);

impl Sha1 {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, as shown in commit listings.
    pub fn short(&self) -> &str {
        &self.0[..7]
    }
}

impl TryFrom<String> for Sha1 {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let ok = s.len() == 40 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if ok {
            Ok(Self(s))
        } else {
            Err(ModelError::InvalidSha(s))
        }
    }
}

impl FromStr for Sha1 {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl From<Sha1> for String {
    fn from(s: Sha1) -> Self {
        s.0
    }
}

impl fmt::Display for Sha1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Project identity: `"{owner}/{repo}"` on the source host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectKey(String);

impl ProjectKey {
    pub fn new(owner: &str, repo: &str) -> Result<Self, ModelError> {
        format!("{owner}/{repo}").parse()
    }

    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(o, _)| o).unwrap_or_default()
    }

    pub fn repo(&self) -> &str {
        self.0.split_once('/').map(|(_, r)| r).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Live-update channel name for this project, e.g. `updates_owner_repo`.
    pub fn channel(&self) -> String {
        format!("updates_{}", self.0.replace('/', "_"))
    }
}

impl TryFrom<String> for ProjectKey {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let valid = match s.split_once('/') {
            Some((owner, repo)) => {
                !owner.is_empty()
                    && !repo.is_empty()
                    && !repo.contains('/')
                    && owner != ".."
                    && repo != ".."
                    && owner != "."
                    && repo != "."
            }
            None => false,
        };
        if valid {
            Ok(Self(s))
        } else {
            Err(ModelError::InvalidProjectKey(s))
        }
    }
}

impl FromStr for ProjectKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl From<ProjectKey> for String {
    fn from(k: ProjectKey) -> Self {
        k.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-project shared secret (40 hex chars). Signs inbound webhooks and is
/// handed to CI as an encrypted variable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Secret(String);

impl Secret {
    /// Derive a fresh secret from `seed`, the current time and a random uuid.
    pub fn generate(seed: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(
            Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_le_bytes(),
        );
        hasher.update(Uuid::new_v4().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..40].to_owned())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Secret {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s))
        } else {
            Err(ModelError::InvalidSecret)
        }
    }
}

impl From<Secret> for String {
    fn from(s: Secret) -> Self {
        s.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

// ---------------------------------------------------------------------------
// Onboarding progress
// ---------------------------------------------------------------------------

/// Outcome of probing the upstream repository for the user config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserConfig {
    #[default]
    Unchecked,
    Absent,
    Present,
}

/// Validation state of the fork's copy of the user config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkConfig {
    #[default]
    Unchecked,
    Valid,
    Invalid,
}

/// How far CI has been wired up for the fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiLink {
    #[default]
    Unrequested,
    SyncRequested,
    HookEnabled,
}

/// Persisted onboarding state of a project.
///
/// Mutually exclusive stages are enums so that combinations such as
/// "valid and invalid" cannot be stored. The boolean accessors expose the
/// classic flag names for callers and status output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub has_webhook: bool,
    pub forked: bool,
    pub user_config: UserConfig,
    pub fork_config: ForkConfig,
    pub fork_ci_config_committed: bool,
    pub ci: CiLink,
    pub init_complete: bool,
}

impl Progress {
    pub fn checked_user_config(&self) -> bool {
        self.user_config != UserConfig::Unchecked
    }

    pub fn user_config_present(&self) -> bool {
        self.user_config == UserConfig::Present
    }

    pub fn fork_config_present(&self) -> bool {
        self.fork_config != ForkConfig::Unchecked
    }

    pub fn fork_config_valid(&self) -> bool {
        self.fork_config == ForkConfig::Valid
    }

    pub fn fork_config_invalid(&self) -> bool {
        self.fork_config == ForkConfig::Invalid
    }

    pub fn ci_sync_requested(&self) -> bool {
        self.ci != CiLink::Unrequested
    }

    pub fn ci_webhook_enabled(&self) -> bool {
        self.ci == CiLink::HookEnabled
    }

    /// Forget everything derived from the fork's content. Called whenever an
    /// upstream change is folded into the fork.
    pub fn reset_fork_state(&mut self) {
        self.fork_config = ForkConfig::Unchecked;
        self.fork_ci_config_committed = false;
    }

    /// `(name, value)` pairs for every flag, in onboarding order.
    pub fn flags(&self) -> [(&'static str, bool); 11] {
        [
            ("has_webhook", self.has_webhook),
            ("forked", self.forked),
            ("checked_user_config", self.checked_user_config()),
            ("user_config_present", self.user_config_present()),
            ("fork_config_present", self.fork_config_present()),
            ("fork_config_valid", self.fork_config_valid()),
            ("fork_config_invalid", self.fork_config_invalid()),
            ("fork_ci_config_committed", self.fork_ci_config_committed),
            ("ci_sync_requested", self.ci_sync_requested()),
            ("ci_webhook_enabled", self.ci_webhook_enabled()),
            ("init_complete", self.init_complete),
        ]
    }
}

// ---------------------------------------------------------------------------
// Shields
// ---------------------------------------------------------------------------

/// Subjects of the status shields every project carries, in display order.
pub const SHIELD_SUBJECTS: [&str; 4] = ["docs", "sim", "altera", "xilinx"];

pub const UNKNOWN_STATUS: &str = "unknown";

/// A small status badge shown on the project page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shield {
    pub subject: String,
    pub status: String,
    pub colour: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl Shield {
    pub fn placeholder(subject: &str) -> Self {
        Self {
            subject: subject.to_owned(),
            status: UNKNOWN_STATUS.to_owned(),
            colour: "lightgrey".to_owned(),
            href: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.status == UNKNOWN_STATUS
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Link to the upstream repository on the source host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepositoryRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<u64>,
    #[serde(default)]
    pub provider: String,
    pub name: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl RepositoryRef {
    pub fn github(key: &ProjectKey) -> Self {
        Self {
            repo_id: None,
            provider: "github".to_owned(),
            name: key.repo().to_owned(),
            full_name: key.to_string(),
            url: Some(format!("https://github.com/{key}")),
            api_url: Some(format!("https://api.github.com/repos/{key}")),
        }
    }
}

/// A tracked project. One per upstream repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub key: ProjectKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepositoryRef>,
    #[serde(default)]
    pub shields: Vec<Shield>,
    pub secret: Secret,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub system_message: String,
    /// FIFO of Push keys still to be folded into the fork.
    #[serde(default)]
    pub pending_merges: Vec<Sha1>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// A fresh project with placeholder shields and a generated secret.
    pub fn new(key: ProjectKey) -> Self {
        Self {
            name: key.repo().to_owned(),
            owner: Some(key.owner().to_owned()),
            description: String::new(),
            tags: Vec::new(),
            repo: Some(RepositoryRef::github(&key)),
            shields: SHIELD_SUBJECTS.iter().map(|s| Shield::placeholder(s)).collect(),
            secret: Secret::generate(key.as_str()),
            progress: Progress::default(),
            failure_count: 0,
            system_message: String::new(),
            pending_merges: Vec::new(),
            created_at: Utc::now(),
            key,
        }
    }

    /// Repository name on the source host; falls back to the key when the
    /// repository link is missing.
    pub fn repo_name(&self) -> &str {
        self.repo
            .as_ref()
            .map(|r| r.name.as_str())
            .unwrap_or_else(|| self.key.repo())
    }

    pub fn shield(&self, subject: &str) -> Option<&Shield> {
        self.shields.iter().find(|s| s.subject == subject)
    }

    /// Update the `sim` shield from the counts of a simulation run.
    pub fn update_sim_result(&mut self, passed: u32, failures: u32, errors: u32, skipped: u32) {
        let (colour, status) = if errors != 0 {
            ("red", format!("{errors} errors"))
        } else if failures != 0 {
            ("orange", format!("{failures} failures"))
        } else if passed != 0 {
            ("brightgreen", format!("{passed} passing"))
        } else if skipped != 0 {
            ("yellow", format!("all skipped ({skipped})"))
        } else {
            ("lightgrey", "no tests".to_owned())
        };

        let shield = match self.shields.iter().position(|s| s.subject == "sim") {
            Some(idx) => &mut self.shields[idx],
            None => {
                self.shields.push(Shield::placeholder("sim"));
                let last = self.shields.len() - 1;
                &mut self.shields[last]
            }
        };
        shield.href = Some("simulation".to_owned());
        shield.colour = colour.to_owned();
        shield.status = status;
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_owned());
        }
    }
}

impl Entity for Project {
    const KIND: &'static str = "project";

    fn key(&self) -> String {
        self.key.to_string()
    }
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// One repository update event, keyed by the commit it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Push {
    pub id: Sha1,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Sha1>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Sha1>,
    /// Commit produced when this push was folded into the fork.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_merge: Option<Sha1>,
    /// Commit produced when CI config was regenerated after this push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_update: Option<Sha1>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Push {
    /// A bare push tracking `sha`, used for the pre-fork head.
    pub fn at(sha: Sha1) -> Self {
        Self {
            id: sha,
            ref_name: None,
            before: None,
            after: None,
            fork_merge: None,
            ci_update: None,
            compare: None,
            created_at: Utc::now(),
        }
    }

    /// Commit to fold into the fork.
    pub fn target(&self) -> &Sha1 {
        self.after.as_ref().unwrap_or(&self.id)
    }

    /// True if `sha` is this push or a commit derived from it.
    pub fn tracks(&self, sha: &Sha1) -> bool {
        &self.id == sha
            || self.fork_merge.as_ref() == Some(sha)
            || self.ci_update.as_ref() == Some(sha)
    }
}

impl Entity for Push {
    const KIND: &'static str = "push";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

// ---------------------------------------------------------------------------
// CI records
// ---------------------------------------------------------------------------

/// One CI job. Providers restart jobs, so several records may share a
/// `(repository_id, number)`; exactly one of those stays `valid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiJob {
    pub id: u64,
    #[serde(default)]
    pub build_id: Option<u64>,
    #[serde(default)]
    pub commit: Option<Sha1>,
    #[serde(default)]
    pub repository_id: Option<u64>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub log_id: Option<u64>,
    #[serde(default)]
    pub logfiles: Vec<String>,
    pub valid: bool,
}

impl CiJob {
    pub fn new(id: u64, commit: Option<Sha1>) -> Self {
        Self {
            id,
            build_id: None,
            commit,
            repository_id: None,
            number: None,
            state: None,
            duration: None,
            log_id: None,
            logfiles: Vec::new(),
            valid: true,
        }
    }
}

impl Entity for CiJob {
    const KIND: &'static str = "job";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// One CI build, grouping jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiBuild {
    pub id: u64,
    #[serde(default)]
    pub commit: Option<Sha1>,
    #[serde(default)]
    pub repository_id: Option<u64>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub pull_request: Option<bool>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub job_ids: Vec<u64>,
    pub valid: bool,
}

impl CiBuild {
    pub fn new(id: u64, commit: Option<Sha1>) -> Self {
        Self {
            id,
            commit,
            repository_id: None,
            number: None,
            pull_request: None,
            state: None,
            duration: None,
            job_ids: Vec::new(),
            valid: true,
        }
    }
}

impl Entity for CiBuild {
    const KIND: &'static str = "build";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Outcome of a single test case.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TestCase {
    pub classname: String,
    pub name: String,
    pub time: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Aggregated results of one test suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub tests: u32,
    pub errors: u32,
    pub failures: u32,
    pub skipped: u32,
    pub passed: u32,
    pub time: f64,
    #[serde(default)]
    pub testcases: Vec<TestCase>,
    #[serde(default)]
    pub job: Option<u64>,
    #[serde(default)]
    pub build: Option<u64>,
    #[serde(default)]
    pub push: Option<Sha1>,
    #[serde(default)]
    pub project: Option<ProjectKey>,
    pub valid: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for TestResult {
    const KIND: &'static str = "test_result";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn sha1_accepts_lower_hex_only() {
        assert!(Sha1::from_str(SHA).is_ok());
        assert!(Sha1::from_str(&SHA.to_uppercase()).is_err());
        assert!(Sha1::from_str("abc").is_err());
        assert!(Sha1::from_str(&format!("{}g", &SHA[..39])).is_err());
    }

    #[test]
    fn sha1_rejected_on_deserialize() {
        let err = serde_json::from_str::<Sha1>("\"not-a-sha\"");
        assert!(err.is_err());
        let ok: Sha1 = serde_json::from_str(&format!("\"{SHA}\"")).expect("valid sha");
        assert_eq!(ok.short(), "0123456");
    }

    #[test]
    fn project_key_parts() {
        let key = ProjectKey::new("chiggs", "some_repo").expect("key");
        assert_eq!(key.owner(), "chiggs");
        assert_eq!(key.repo(), "some_repo");
        assert_eq!(key.channel(), "updates_chiggs_some_repo");
        assert!(ProjectKey::from_str("no-slash").is_err());
        assert!(ProjectKey::from_str("a/b/c").is_err());
        assert!(ProjectKey::from_str("../etc").is_err());
    }

    #[test]
    fn generated_secret_is_40_hex() {
        let a = Secret::generate("x/y");
        let b = Secret::generate("x/y");
        assert_eq!(a.expose().len(), 40);
        assert!(a.expose().bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(format!("{a:?}"), "Secret(..)");
    }

    #[test]
    fn new_project_has_placeholder_shields_in_order() {
        let p = Project::new(ProjectKey::new("o", "r").unwrap());
        let subjects: Vec<_> = p.shields.iter().map(|s| s.subject.as_str()).collect();
        assert_eq!(subjects, SHIELD_SUBJECTS);
        assert!(p.shields.iter().all(|s| s.status == "unknown" && s.colour == "lightgrey"));
        assert!(!p.progress.has_webhook);
        assert!(p.pending_merges.is_empty());
    }

    #[test]
    fn sim_shield_priorities() {
        let mut p = Project::new(ProjectKey::new("o", "r").unwrap());
        p.update_sim_result(5, 1, 2, 0);
        let sim = p.shield("sim").unwrap();
        assert_eq!((sim.colour.as_str(), sim.status.as_str()), ("red", "2 errors"));
        assert_eq!(sim.href.as_deref(), Some("simulation"));

        p.update_sim_result(5, 1, 0, 0);
        assert_eq!(p.shield("sim").unwrap().status, "1 failures");
        p.update_sim_result(5, 0, 0, 3);
        assert_eq!(p.shield("sim").unwrap().colour, "brightgreen");
        p.update_sim_result(0, 0, 0, 3);
        assert_eq!(p.shield("sim").unwrap().status, "all skipped (3)");
        p.update_sim_result(0, 0, 0, 0);
        assert_eq!(p.shield("sim").unwrap().status, "no tests");
    }

    #[test]
    fn progress_flags_are_exclusive() {
        let mut progress = Progress {
            fork_config: ForkConfig::Invalid,
            fork_ci_config_committed: true,
            ..Progress::default()
        };
        assert!(progress.fork_config_invalid());
        assert!(!progress.fork_config_valid());
        progress.reset_fork_state();
        assert!(!progress.fork_config_invalid());
        assert!(!progress.fork_ci_config_committed);
    }

    #[test]
    fn push_tracks_derived_commits() {
        let sha = Sha1::from_str(SHA).unwrap();
        let merged = Sha1::from_str(&"f".repeat(40)).unwrap();
        let mut push = Push::at(sha.clone());
        assert_eq!(push.target(), &sha);
        push.fork_merge = Some(merged.clone());
        assert!(push.tracks(&merged));
    }
}
