//! Keyed object store.
//!
//! # Model
//!
//! Records are grouped by *kind* (`project`, `push`, `job`, ...) and addressed
//! by a string key. Backends only move raw JSON values around; typed access
//! lives in [`StoreExt`], implemented for every [`ObjectStore`].
//!
//! # Storage layout ([`FileStore`])
//!
//! ```text
//! ~/.opencorps/
//!   project/
//!     <owner>/<repo>.yaml   (mode 0600)
//!   push/
//!     <sha>.yaml
//!   job/ build/ test_result/
//! ```
//!
//! # Transactions
//!
//! [`ObjectStore::atomically`] runs a closure while holding the store's
//! transaction lock. `insert` and `insert_or_update` use it so that two
//! writers racing on the same record never clobber each other; plain `put`
//! is last-writer-wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{io_err, StoreError};
use crate::merge::Merge;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A record that lives in the store.
pub trait Entity: Serialize + DeserializeOwned + Clone {
    const KIND: &'static str;

    fn key(&self) -> String;
}

/// Untyped backend interface.
pub trait ObjectStore: Send + Sync {
    fn read(&self, kind: &str, key: &str) -> Result<Option<Value>, StoreError>;

    fn write(&self, kind: &str, key: &str, value: Value) -> Result<(), StoreError>;

    /// Every record of `kind`, ordered by key.
    fn scan(&self, kind: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Run `f` inside the store's transaction boundary.
    fn atomically(
        &self,
        f: &mut dyn FnMut() -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

/// Typed operations over any [`ObjectStore`].
pub trait StoreExt: ObjectStore {
    fn get<E: Entity>(&self, key: &str) -> Result<Option<E>, StoreError> {
        match self.read(E::KIND, key)? {
            Some(value) => decode::<E>(key, value).map(Some),
            None => Ok(None),
        }
    }

    fn put<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let key = entity.key();
        let value = encode(entity)?;
        tracing::debug!(kind = E::KIND, key = %key, "storing record");
        self.write(E::KIND, &key, value)
    }

    /// Store `entity` unless a record with the same key exists. Returns
    /// whichever record is stored afterwards.
    fn insert<E: Entity>(&self, entity: E) -> Result<E, StoreError> {
        let key = entity.key();
        let mut stored: Option<E> = None;
        self.atomically(&mut || {
            match self.get::<E>(&key)? {
                Some(existing) => {
                    tracing::info!(kind = E::KIND, key = %key, "insert collided with stored record");
                    stored = Some(existing);
                }
                None => {
                    self.put(&entity)?;
                    stored = Some(entity.clone());
                }
            }
            Ok(())
        })?;
        Ok(stored.unwrap_or(entity))
    }

    /// Insert `entity`, or fold its fields into the stored record using the
    /// entity's [`Merge`] policy.
    fn insert_or_update<E: Entity + Merge>(&self, entity: E) -> Result<E, StoreError> {
        let key = entity.key();
        let mut stored: Option<E> = None;
        self.atomically(&mut || {
            let record = match self.get::<E>(&key)? {
                Some(mut existing) => {
                    existing.merge_from(&entity);
                    existing
                }
                None => entity.clone(),
            };
            self.put(&record)?;
            stored = Some(record);
            Ok(())
        })?;
        Ok(stored.unwrap_or(entity))
    }

    /// All records of a kind matching `pred`, ordered by key. Callers
    /// truncate with `.into_iter().take(n)` where a limit is wanted.
    fn query<E: Entity>(&self, pred: impl Fn(&E) -> bool) -> Result<Vec<E>, StoreError> {
        let mut out = Vec::new();
        for (key, value) in self.scan(E::KIND)? {
            let entity = decode::<E>(&key, value)?;
            if pred(&entity) {
                out.push(entity);
            }
        }
        Ok(out)
    }
}

impl<S: ObjectStore + ?Sized> StoreExt for S {}

fn decode<E: Entity>(key: &str, value: Value) -> Result<E, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Decode {
        kind: E::KIND,
        key: key.to_owned(),
        source,
    })
}

fn encode<E: Entity>(entity: &E) -> Result<Value, StoreError> {
    serde_json::to_value(entity).map_err(|source| StoreError::Encode {
        kind: E::KIND,
        source,
    })
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store. Used by tests and by callers that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<(String, String), Value>>,
    tx: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryStore {
    fn read(&self, kind: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&(kind.to_owned(), key.to_owned())).cloned())
    }

    fn write(&self, kind: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert((kind.to_owned(), key.to_owned()), value);
        Ok(())
    }

    fn scan(&self, kind: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn atomically(
        &self,
        f: &mut dyn FnMut() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let _guard = self.tx.lock().map_err(|_| StoreError::Poisoned)?;
        f()
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// YAML-file-per-record store rooted at a directory.
///
/// Writes are atomic: serialize to a `.yaml.tmp` sibling, `chmod 0600`,
/// then `rename` over the target.
pub struct FileStore {
    root: PathBuf,
    tx: Mutex<()>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
            set_dir_permissions(&root)?;
        }
        Ok(Self {
            root,
            tx: Mutex::new(()),
        })
    }

    /// Open the store under `<home>/.opencorps/`.
    pub fn open_at(home: &Path) -> Result<Self, StoreError> {
        Self::open(crate::paths::store_root_at(home))
    }

    /// `open_at` convenience wrapper.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open_at(&crate::paths::home()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<kind>/<key>.yaml`, refusing keys that would escape the root.
    pub fn record_path(&self, kind: &str, key: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.root.join(checked_segment(kind, kind)?);
        let segments: Vec<&str> = key.split('/').collect();
        let (last, dirs) = segments
            .split_last()
            .ok_or_else(|| StoreError::InvalidKey(key.to_owned()))?;
        for dir in dirs {
            path.push(checked_segment(dir, key)?);
        }
        path.push(format!("{}.yaml", checked_segment(last, key)?));
        Ok(path)
    }
}

fn checked_segment<'a>(segment: &'a str, key: &str) -> Result<&'a str, StoreError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
        return Err(StoreError::InvalidKey(key.to_owned()));
    }
    Ok(segment)
}

impl ObjectStore for FileStore {
    fn read(&self, kind: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.record_path(kind, key)?;
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Parse { path, source })
    }

    fn write(&self, kind: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.record_path(kind, key)?;
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
                set_dir_permissions(dir)?;
            }
        }
        let tmp_path = path.with_extension("yaml.tmp");
        let yaml = serde_yaml::to_string(&value)?;
        std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    fn scan(&self, kind: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let dir = self.root.join(checked_segment(kind, kind)?);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut files = Vec::new();
        collect_records(&dir, &mut files)?;

        let mut out = Vec::with_capacity(files.len());
        for path in files {
            let Some(key) = key_for(&dir, &path) else { continue };
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            let value: Value = serde_yaml::from_str(&contents)
                .map_err(|source| StoreError::Parse { path: path.clone(), source })?;
            out.push((key, value));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn atomically(
        &self,
        f: &mut dyn FnMut() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let _guard = self.tx.lock().map_err(|_| StoreError::Poisoned)?;
        f()
    }
}

fn collect_records(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            collect_records(&path, out)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("yaml") {
            out.push(path);
        }
    }
    Ok(())
}

fn key_for(dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(dir).ok()?.with_extension("");
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
