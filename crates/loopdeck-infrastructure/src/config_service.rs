//! Configuration service implementation.
//!
//! Loads `LoopdeckConfig` from `~/.config/loopdeck/config.toml`. A missing
//! file yields defaults; a malformed file is logged and also yields defaults.

use crate::paths::LoopdeckPaths;
use loopdeck_core::config::LoopdeckConfig;
use loopdeck_core::error::{LoopdeckError, Result};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Configuration service that loads and caches the configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    /// Explicit config path; `None` resolves the platform default.
    path: Option<PathBuf>,
    config: Arc<RwLock<Option<LoopdeckConfig>>>,
}

impl ConfigService {
    /// Creates a service reading the platform config file on first access.
    pub fn new() -> Self {
        Self {
            path: None,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Creates a service reading from a specific file (used by tests and `--config`).
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading from file if not cached.
    pub fn get_config(&self) -> LoopdeckConfig {
        {
            let read_lock = self.config.read().unwrap_or_else(|p| p.into_inner());
            if let Some(ref cached) = *read_lock {
                return cached.clone();
            }
        }

        let loaded = match self.load_config() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("[ConfigService] Falling back to defaults: {}", e);
                LoopdeckConfig::default()
            }
        };

        {
            let mut write_lock = self.config.write().unwrap_or_else(|p| p.into_inner());
            *write_lock = Some(loaded.clone());
        }

        loaded
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap_or_else(|p| p.into_inner());
        *write_lock = None;
    }

    /// Resolved path of the config file.
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(LoopdeckPaths::config_file()?),
        }
    }

    fn load_config(&self) -> Result<LoopdeckConfig> {
        let path = self.config_path()?;
        if !path.exists() {
            tracing::debug!(
                "[ConfigService] No config at {}, using defaults",
                path.display()
            );
            return Ok(LoopdeckConfig::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: LoopdeckConfig = toml::from_str(&content)?;
        if config.autosave_delay_ms == 0 {
            return Err(LoopdeckError::config("autosave_delay_ms must be positive"));
        }
        tracing::debug!("[ConfigService] Loaded config from {}", path.display());
        Ok(config)
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}
