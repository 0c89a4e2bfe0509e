//! In-memory collaborators for tests.
//!
//! Enabled for this crate's own tests and, through the `fakes` feature, for
//! downstream crates. Every fake keeps its state behind a mutex that tests
//! can lock to arrange failures or inspect calls.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use opencorps_core::{CorpsConfig, MemoryStore, Secret, Sha1};
use opencorps_renderer::{RenderError, Renderer};

use crate::clients::{BuildPayload, CiHook, CiHost, CiRepo, CiSettings, Notifier, SourceHost};
use crate::context::Context;
use crate::error::ClientError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Source host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRecord {
    pub owner: String,
    pub repo: String,
    pub url: String,
    pub secret: String,
}

type RepoId = (String, String);

#[derive(Debug, Default)]
pub struct SourceState {
    pub files: BTreeMap<(String, String, String), String>,
    pub heads: BTreeMap<RepoId, Sha1>,
    pub forks: Vec<(String, String, String)>,
    pub commits: Vec<CommitRecord>,
    pub cherry_picks: Vec<Sha1>,
    pub merges: Vec<Sha1>,
    pub webhooks: Vec<WebhookRecord>,

    pub fail_fork: bool,
    pub fail_webhook: bool,
    pub fail_cherry_pick: bool,
    /// Cherry-picks succeed but produce no commit.
    pub empty_cherry_pick: bool,
    pub fail_merge: bool,
    pub refuse_commits: bool,

    commit_counter: u64,
}

impl SourceState {
    pub fn file(&self, owner: &str, repo: &str, path: &str) -> Option<&str> {
        self.files
            .get(&(owner.to_owned(), repo.to_owned(), path.to_owned()))
            .map(String::as_str)
    }

    pub fn head(&self, owner: &str, repo: &str) -> Option<Sha1> {
        self.heads.get(&(owner.to_owned(), repo.to_owned())).cloned()
    }

    /// Advance `owner/repo` to a new synthetic commit.
    fn new_commit(&mut self, owner: &str, repo: &str) -> Result<Sha1, ClientError> {
        self.commit_counter += 1;
        let sha = Sha1::try_from(format!("{:040x}", self.commit_counter))
            .map_err(|e| ClientError::api("commit", 500, e.to_string()))?;
        self.heads
            .insert((owner.to_owned(), repo.to_owned()), sha.clone());
        Ok(sha)
    }

    /// Copy every upstream file of a repository called `repo` into
    /// `org/repo`.
    fn pull_upstream(&mut self, org: &str, repo: &str) {
        let upstream: Vec<_> = self
            .files
            .iter()
            .filter(|((o, r, _), _)| r == repo && o != org)
            .map(|((_, _, path), contents)| (path.clone(), contents.clone()))
            .collect();
        for (path, contents) in upstream {
            self.files
                .insert((org.to_owned(), repo.to_owned(), path), contents);
        }
    }
}

/// Source host backed by a map of `(owner, repo, path)` to file contents.
#[derive(Debug, Default)]
pub struct FakeSource {
    state: Mutex<SourceState>,
}

impl FakeSource {
    pub fn state(&self) -> MutexGuard<'_, SourceState> {
        lock(&self.state)
    }

    /// Write a file as a new commit on `owner/repo`.
    pub fn put_file(&self, owner: &str, repo: &str, path: &str, contents: &str) {
        let mut state = self.state();
        state.files.insert(
            (owner.to_owned(), repo.to_owned(), path.to_owned()),
            contents.to_owned(),
        );
        // The counter always yields valid hex.
        let _ = state.new_commit(owner, repo);
    }

    pub fn remove_file(&self, owner: &str, repo: &str, path: &str) {
        self.state()
            .files
            .remove(&(owner.to_owned(), repo.to_owned(), path.to_owned()));
    }

    pub fn set_head(&self, owner: &str, repo: &str, sha: Sha1) {
        self.state()
            .heads
            .insert((owner.to_owned(), repo.to_owned()), sha);
    }
}

impl SourceHost for FakeSource {
    fn fork(&self, owner: &str, repo: &str, target_org: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.fail_fork {
            return Err(ClientError::api("fork", 403, "forking disabled"));
        }
        state
            .forks
            .push((owner.to_owned(), repo.to_owned(), target_org.to_owned()));
        state.pull_upstream(target_org, repo);
        let upstream_head = state.head(owner, repo);
        if let Some(head) = upstream_head {
            state
                .heads
                .insert((target_org.to_owned(), repo.to_owned()), head);
        }
        Ok(())
    }

    fn head(&self, owner: &str, repo: &str) -> Result<Sha1, ClientError> {
        self.state()
            .head(owner, repo)
            .ok_or_else(|| ClientError::api("head", 404, format!("{owner}/{repo} not found")))
    }

    fn get_file(&self, owner: &str, repo: &str, path: &str) -> Result<Option<String>, ClientError> {
        Ok(self.state().file(owner, repo, path).map(str::to_owned))
    }

    fn commit_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        contents: &str,
        message: &str,
    ) -> Result<bool, ClientError> {
        let mut state = self.state();
        if state.refuse_commits {
            return Ok(false);
        }
        state.files.insert(
            (owner.to_owned(), repo.to_owned(), path.to_owned()),
            contents.to_owned(),
        );
        state.new_commit(owner, repo)?;
        state.commits.push(CommitRecord {
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            path: path.to_owned(),
            message: message.to_owned(),
        });
        Ok(true)
    }

    fn cherry_pick(
        &self,
        owner: &str,
        repo: &str,
        sha: &Sha1,
        _force: bool,
    ) -> Result<Option<Sha1>, ClientError> {
        let mut state = self.state();
        state.cherry_picks.push(sha.clone());
        if state.fail_cherry_pick {
            return Err(ClientError::api("cherry-pick", 409, "conflict"));
        }
        if state.empty_cherry_pick {
            return Ok(None);
        }
        state.pull_upstream(owner, repo);
        state.new_commit(owner, repo).map(Some)
    }

    fn merge(&self, owner: &str, repo: &str, sha: &Sha1) -> Result<Option<Sha1>, ClientError> {
        let mut state = self.state();
        state.merges.push(sha.clone());
        if state.fail_merge {
            return Err(ClientError::api("merge", 409, "merge conflict"));
        }
        state.pull_upstream(owner, repo);
        state.new_commit(owner, repo).map(Some)
    }

    fn create_webhook(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
        secret: &Secret,
    ) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.fail_webhook {
            return Err(ClientError::api("create webhook", 422, "hook rejected"));
        }
        state.webhooks.push(WebhookRecord {
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            url: url.to_owned(),
            secret: secret.expose().to_owned(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CI host
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CiState {
    pub synced: bool,
    pub hooks: Vec<CiHook>,
    pub repos: BTreeMap<RepoId, CiRepo>,
    pub builds: BTreeMap<u64, BuildPayload>,
    pub enabled: Vec<u64>,
    pub settings: Vec<(u64, CiSettings)>,
    pub sync_requests: Vec<bool>,
    pub encrypted: usize,

    pub fail_sync: bool,
    pub fail_encrypt: bool,
    pub reject_settings: bool,
}

#[derive(Debug, Default)]
pub struct FakeCi {
    state: Mutex<CiState>,
}

impl FakeCi {
    pub fn state(&self) -> MutexGuard<'_, CiState> {
        lock(&self.state)
    }

    /// Synced account with an inactive hook (id 1) and repository (id 42)
    /// for `org/repo`.
    pub fn ready_for(&self, org: &str, repo: &str) {
        let mut state = self.state();
        state.synced = true;
        state.hooks.push(CiHook {
            id: 1,
            name: repo.to_owned(),
            owner_name: org.to_owned(),
            active: false,
        });
        state.repos.insert(
            (org.to_owned(), repo.to_owned()),
            CiRepo {
                id: 42,
                slug: format!("{org}/{repo}"),
            },
        );
    }
}

impl CiHost for FakeCi {
    fn sync(&self, block: bool) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.fail_sync {
            return Err(ClientError::api("sync", 500, "sync unavailable"));
        }
        state.sync_requests.push(block);
        Ok(())
    }

    fn is_synced(&self) -> Result<bool, ClientError> {
        Ok(self.state().synced)
    }

    fn hooks(&self) -> Result<Vec<CiHook>, ClientError> {
        Ok(self.state().hooks.clone())
    }

    fn repo(&self, org: &str, name: &str) -> Result<CiRepo, ClientError> {
        self.state()
            .repos
            .get(&(org.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| ClientError::api("repo", 404, format!("{org}/{name} not found")))
    }

    fn enable_hook(&self, id: u64) -> Result<(), ClientError> {
        let mut state = self.state();
        match state.hooks.iter_mut().find(|h| h.id == id) {
            Some(hook) => hook.active = true,
            None => return Err(ClientError::api("enable hook", 404, format!("hook {id} not found"))),
        }
        state.enabled.push(id);
        Ok(())
    }

    fn update_settings(&self, repo_id: u64, settings: &CiSettings) -> Result<bool, ClientError> {
        let mut state = self.state();
        state.settings.push((repo_id, *settings));
        Ok(!state.reject_settings)
    }

    fn encrypt(&self, _org: &str, _repo: &str, plaintext: &str) -> Result<String, ClientError> {
        let mut state = self.state();
        if state.fail_encrypt {
            return Err(ClientError::api("encrypt", 404, "no public key"));
        }
        state.encrypted += 1;
        Ok(format!("c2VjdXJl{:06}{:04}", state.encrypted, plaintext.len()))
    }

    fn build(&self, id: u64) -> Result<BuildPayload, ClientError> {
        self.state()
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| ClientError::api("build", 404, format!("build {id} not found")))
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Keeps every `(channel, event, payload)` published.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(String, String, Value)> {
        lock(&self.events).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, channel: &str, event: &str, payload: &Value) {
        lock(&self.events).push((channel.to_owned(), event.to_owned(), payload.clone()));
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// Default config, an empty store and fresh fakes.
pub struct Fixture {
    pub config: CorpsConfig,
    pub store: MemoryStore,
    pub source: FakeSource,
    pub ci: FakeCi,
    pub notifier: RecordingNotifier,
    pub renderer: Renderer,
}

impl Fixture {
    pub fn new() -> Result<Self, RenderError> {
        Ok(Self {
            config: CorpsConfig::default(),
            store: MemoryStore::new(),
            source: FakeSource::default(),
            ci: FakeCi::default(),
            notifier: RecordingNotifier::default(),
            renderer: Renderer::embedded()?,
        })
    }

    pub fn ctx(&self) -> Context<'_> {
        Context {
            config: &self.config,
            store: &self.store,
            source: &self.source,
            ci: &self.ci,
            notifier: &self.notifier,
            renderer: &self.renderer,
        }
    }
}
