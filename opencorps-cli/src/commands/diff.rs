//! `opencorps diff <.opencorps.yml>`: unified diff of the CI config that
//! would be committed to the fork.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use opencorps_core::{ProjectKey, CI_CONFIG_FILE};
use opencorps_renderer::{config_diff, same_ignoring_secure, CiContext, CoreFile, Renderer};

use super::load_config;

/// Stand-in for provider-encrypted values, which need the CI host.
const SECURE_PLACEHOLDER: &str = "<encrypted>";

/// Arguments for `opencorps diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Path to the project's `.opencorps.yml`.
    pub file: PathBuf,

    /// Project the config belongs to, as `owner/repo`.
    #[arg(long, short = 'p')]
    pub project: ProjectKey,

    /// Currently committed `.travis.yml`; omitted means the fork has none.
    #[arg(long)]
    pub existing: Option<PathBuf>,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config()?;
        let text = std::fs::read_to_string(&self.file)
            .with_context(|| format!("cannot read '{}'", self.file.display()))?;
        let core = CoreFile::parse(&text)
            .with_context(|| format!("{} is invalid", self.file.display()))?;

        let existing = match &self.existing {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read '{}'", path.display()))?,
            ),
            None => None,
        };

        let secure = vec![SECURE_PLACEHOLDER.to_owned(); config.secure_variables.len() + 1];
        let ctx = CiContext::new(&self.project, &config.webhook_base_url, &core.template_vars(), secure);
        let renderer = Renderer::new(config.template_dir.as_deref())
            .context("failed to load CI templates")?;
        let rendered = renderer
            .render(&ctx)
            .with_context(|| format!("failed to render {CI_CONFIG_FILE} for '{}'", self.project))?;

        if let Some(current) = existing.as_deref() {
            if same_ignoring_secure(current, &rendered) {
                println!("No differences for '{}' (encrypted values ignored).", self.project);
                return Ok(());
            }
        }

        let diff = config_diff(CI_CONFIG_FILE, existing.as_deref(), &rendered);
        print!("{diff}");
        if !diff.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}
