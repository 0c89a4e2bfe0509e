//! Scheduler that re-invokes onboarding steps until each project is done.

mod error;
mod runtime;
pub mod scheduler;
mod services;

pub use error::DaemonError;
pub use runtime::{init_tracing, resume_incomplete, serve, Daemon};
pub use scheduler::{DriveOutcome, ProjectStatus, SchedulerHandle};
pub use services::Services;
