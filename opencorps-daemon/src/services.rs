use std::sync::Arc;

use opencorps_core::{CorpsConfig, ObjectStore};
use opencorps_renderer::Renderer;
use opencorps_sync::{CiHost, Context, Notifier, SourceHost};

use crate::error::DaemonError;

/// Shared collaborators, built once per daemon and handed to every step.
pub struct Services {
    pub config: CorpsConfig,
    pub store: Arc<dyn ObjectStore>,
    pub source: Arc<dyn SourceHost>,
    pub ci: Arc<dyn CiHost>,
    pub notifier: Arc<dyn Notifier>,
    pub renderer: Renderer,
}

impl Services {
    /// Bundle the collaborators and load the CI template, honouring
    /// `config.template_dir` overrides.
    pub fn new(
        config: CorpsConfig,
        store: Arc<dyn ObjectStore>,
        source: Arc<dyn SourceHost>,
        ci: Arc<dyn CiHost>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, DaemonError> {
        let renderer = Renderer::new(config.template_dir.as_deref())?;
        Ok(Self {
            config,
            store,
            source,
            ci,
            notifier,
            renderer,
        })
    }

    pub fn context(&self) -> Context<'_> {
        Context {
            config: &self.config,
            store: self.store.as_ref(),
            source: self.source.as_ref(),
            ci: self.ci.as_ref(),
            notifier: self.notifier.as_ref(),
            renderer: &self.renderer,
        }
    }
}
