//! Template context: serializable rendering payload for the CI template.

use serde::Serialize;

use opencorps_core::ProjectKey;

use crate::corefile::TemplateVars;
use crate::error::RenderError;

/// Build image the generated pipeline runs on.
pub const CI_ENVIRONMENT: &str = "trusty";

/// Everything the CI template can reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CiContext {
    /// `owner/repo` of the upstream project.
    pub repository: String,
    /// Where CI jobs post results back to.
    pub callback_url: String,
    pub environment: String,
    pub modelsim: bool,
    pub fusesoc: bool,
    pub vunit: bool,
    pub quartus: bool,
    pub vivado: bool,
    /// Plain `NAME=value` pairs, `REPOSITORY` last.
    pub environment_variables: Vec<String>,
    /// Provider-encrypted blobs, already opaque.
    pub secure_variables: Vec<String>,
}

impl CiContext {
    pub fn new(
        repository: &ProjectKey,
        base_url: &str,
        vars: &TemplateVars,
        secure_variables: Vec<String>,
    ) -> Self {
        let mut environment_variables = vars.environment_variables.clone();
        environment_variables.push(format!("REPOSITORY={repository}"));
        Self {
            repository: repository.to_string(),
            callback_url: format!("{}/{repository}", base_url.trim_end_matches('/')),
            environment: CI_ENVIRONMENT.to_owned(),
            modelsim: true,
            fusesoc: vars.fusesoc,
            vunit: vars.vunit,
            quartus: vars.quartus,
            vivado: vars.vivado,
            environment_variables,
            secure_variables,
        }
    }

    /// Convert to a `tera::Context` for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}
