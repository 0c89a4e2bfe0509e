//! # opencorps-renderer
//!
//! Turns a project's `.opencorps.yml` into the CI pipeline file committed to
//! its fork.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use opencorps_core::ProjectKey;
//! use opencorps_renderer::{CiContext, CoreFile, Renderer};
//!
//! fn render(key: &ProjectKey, text: &str) -> Option<String> {
//!     let core = CoreFile::parse(text).ok()?;
//!     let ctx = CiContext::new(key, "https://theopencorps.org", &core.template_vars(), vec![]);
//!     Renderer::embedded().ok()?.render(&ctx).ok()
//! }
//! ```

pub mod compare;
pub mod context;
pub mod corefile;
pub mod engine;
pub mod error;

pub use compare::{config_diff, same_ignoring_secure};
pub use context::CiContext;
pub use corefile::{CoreFile, TemplateVars};
pub use engine::Renderer;
pub use error::{CoreFileError, RenderError};
