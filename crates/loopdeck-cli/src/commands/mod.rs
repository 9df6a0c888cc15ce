pub mod config;
pub mod repl;

use anyhow::{Context, Result};
use loopdeck_core::config::LoopdeckConfig;
use loopdeck_infrastructure::{FileKeyStore, LocalBackend, LoopdeckPaths};
use std::sync::Arc;

/// Opens the file-backed local store named by `config`.
pub fn open_store(config: &LoopdeckConfig) -> Result<LocalBackend> {
    let path = LoopdeckPaths::local_store_file(config.data_dir.as_ref())?;
    let store = FileKeyStore::open(path.clone())
        .with_context(|| format!("Failed to open store at {}", path.display()))?;
    let backend = LocalBackend::new(Arc::new(store), config.clone())
        .context("Failed to read local store")?;
    Ok(backend)
}
