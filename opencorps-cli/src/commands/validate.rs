//! `opencorps validate <file>`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use opencorps_renderer::CoreFile;

/// Check a `.opencorps.yml` against the supported schema.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the configuration document.
    pub file: PathBuf,
}

impl ValidateArgs {
    pub fn run(self) -> Result<()> {
        let text = std::fs::read_to_string(&self.file)
            .with_context(|| format!("cannot read '{}'", self.file.display()))?;

        match CoreFile::parse(&text) {
            Ok(core) => {
                println!("{} {} is valid", "✓".green(), self.file.display());
                let vars = core.template_vars();
                let tags = vars.tags();
                if !tags.is_empty() {
                    println!("  Tags: {}", tags.join(", "));
                }
                Ok(())
            }
            Err(err) => bail!("{} is invalid: {err}", self.file.display()),
        }
    }
}
