pub mod diff;
pub mod init;
pub mod purge_jobs;
pub mod push;
pub mod status;
pub mod validate;

use std::path::PathBuf;

use anyhow::{Context, Result};

use opencorps_core::{paths, CorpsConfig, FileStore};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn open_store() -> Result<FileStore> {
    let home = home()?;
    FileStore::open_at(&home)
        .with_context(|| format!("failed to open store under '{}'", home.display()))
}

/// Environment config, with `~/.opencorps/templates/` as the default
/// template override directory.
pub(crate) fn load_config() -> Result<CorpsConfig> {
    let mut config = CorpsConfig::from_env();
    if config.template_dir.is_none() {
        config.template_dir = Some(paths::template_dir_at(&home()?));
    }
    Ok(config)
}
