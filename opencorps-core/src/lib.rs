//! OpenCorps core library: domain types, keyed object store, merge policy.
//!
//! - [`types`]: newtypes, projects, pushes and CI records
//! - [`store`]: [`ObjectStore`] backends and typed [`StoreExt`] access
//! - [`merge`]: per-field policy used by `insert_or_update`
//! - [`jobs`]: duplicate CI job invalidation
//! - [`config`]: [`CorpsConfig`] from the environment

pub mod config;
pub mod error;
pub mod jobs;
pub mod merge;
pub mod paths;
pub mod store;
pub mod types;

pub use config::{CorpsConfig, CI_CONFIG_FILE, USER_CONFIG_FILE};
pub use error::{ModelError, StoreError};
pub use merge::Merge;
pub use store::{Entity, FileStore, MemoryStore, ObjectStore, StoreExt};
pub use types::{
    CiBuild, CiJob, CiLink, ForkConfig, Progress, Project, ProjectKey, Push, RepositoryRef,
    Secret, Sha1, Shield, TestCase, TestResult, UserConfig,
};
