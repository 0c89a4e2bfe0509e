//! # opencorps-sync
//!
//! Drives a project from "registered" to "CI running on its fork", and keeps
//! the fork in step with upstream afterwards.
//!
//! - [`advance`]: one onboarding step per call, chosen by [`Stage::next`]
//! - [`reconcile`]: folds queued upstream pushes into the fork
//! - [`ci_config`]: renders and commits the fork's CI pipeline file
//! - [`ingest`]: push webhooks, CI callbacks, test reports, log files
//! - [`register`]: project creation and webhook registration
//! - [`persist`]: writing a project back without dropping concurrent pushes
//!
//! External services are reached through the traits in [`clients`], passed
//! in with the store and configuration as a [`Context`].

pub mod advance;
pub mod ci_config;
pub mod clients;
pub mod context;
pub mod error;
#[cfg(any(test, feature = "fakes"))]
pub mod fakes;
pub mod ingest;
pub mod junit;
pub mod persist;
pub mod reconcile;
pub mod register;
pub mod stage;

pub use advance::advance;
pub use clients::{
    BuildInfo, BuildPayload, CiHook, CiHost, CiRepo, CiSettings, JobInfo, Notifier, NullNotifier,
    SourceHost,
};
pub use context::{status_payload, Context, STATUS_EVENT};
pub use error::{ClientError, JunitError, SyncError};
pub use ingest::{ingest_push, CiCallback, PushNotification, PushOutcome, PushRepository};
pub use persist::save_project;
pub use reconcile::apply_next;
pub use register::{register_project, webhook_url};
pub use stage::Stage;
