//! Unified path management for loopdeck files.
//!
//! ```text
//! ~/.config/loopdeck/          # Config directory
//! └── config.toml              # Application configuration
//!
//! ~/.local/share/loopdeck/     # Data directory
//! └── local.json               # Local REPL store (anonymous sessions)
//! ```

use std::path::PathBuf;

const APP_DIR: &str = "loopdeck";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Home directory could not be determined.
    HomeDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::HomeDirNotFound => write!(f, "Cannot find home directory"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for loopdeck_core::LoopdeckError {
    fn from(err: PathError) -> Self {
        loopdeck_core::LoopdeckError::config(err.to_string())
    }
}

pub struct LoopdeckPaths;

impl LoopdeckPaths {
    /// Returns the loopdeck configuration directory.
    ///
    /// # Returns
    ///
    /// - `Ok(PathBuf)`: Path to config directory (e.g., `~/.config/loopdeck/`)
    /// - `Err(PathError::HomeDirNotFound)`: Could not determine directory
    pub fn config_dir() -> Result<PathBuf, PathError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::HomeDirNotFound)
    }

    /// Returns the loopdeck data directory.
    pub fn data_dir() -> Result<PathBuf, PathError> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR))
            .ok_or(PathError::HomeDirNotFound)
    }

    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Path of the local store, honouring a configured data directory.
    pub fn local_store_file(data_dir_override: Option<&PathBuf>) -> Result<PathBuf, PathError> {
        let dir = match data_dir_override {
            Some(dir) => dir.clone(),
            None => Self::data_dir()?,
        };
        Ok(dir.join("local.json"))
    }
}
