//! Filesystem locations.
//!
//! As elsewhere, `fn_at(home, ...)` takes an explicit home (tests pass a
//! `TempDir`) and the bare form derives it from `dirs::home_dir()`.

use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// `<home>/.opencorps/`
pub fn store_root_at(home: &Path) -> PathBuf {
    home.join(".opencorps")
}

/// `<home>/.opencorps/templates/`, checked for CI template overrides.
pub fn template_dir_at(home: &Path) -> PathBuf {
    store_root_at(home).join("templates")
}

pub fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}
