//! Application configuration model.
//!
//! Loaded from `config.toml` by the infrastructure `ConfigService`. Every field
//! has a default so a missing or partial file still yields a usable config.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Code placed into a brand-new REPL.
pub const DEFAULT_STARTER_CODE: &str = r#"// Welcome! Edit the pattern and press play.
setcps(0.5)
stack(
  s("bd*2 [~ bd] ~ bd"),
  s("~ sd ~ sd").gain(0.8),
  s("hh*8").gain(0.4)
)"#;

/// Thread id prefix used by the conversation provider for threads that have
/// not been persisted yet.
pub const DEFAULT_PLACEHOLDER_THREAD_PREFIX: &str = "__LOCALID_";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoopdeckConfig {
    /// Quiet period before an edited REPL is written back to storage.
    pub autosave_delay_ms: u64,
    /// Code used for new REPLs and for `reset()`.
    pub starter_code: String,
    /// Thread ids starting with any of these prefixes are never associated.
    pub placeholder_thread_prefixes: Vec<String>,
    /// Overrides the platform data directory for the local store.
    pub data_dir: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for LoopdeckConfig {
    fn default() -> Self {
        Self {
            autosave_delay_ms: 1000,
            starter_code: DEFAULT_STARTER_CODE.to_string(),
            placeholder_thread_prefixes: vec![DEFAULT_PLACEHOLDER_THREAD_PREFIX.to_string()],
            data_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl LoopdeckConfig {
    /// Returns true if `code` is the untouched starter template.
    ///
    /// Whitespace at either end is ignored. This is a heuristic: a user who
    /// types the starter code verbatim is treated as not having edited it.
    pub fn is_default_code(&self, code: &str) -> bool {
        code.trim() == self.starter_code.trim()
    }

    /// Returns true if `thread_id` names an ephemeral thread that must not be
    /// attached to a REPL.
    pub fn is_placeholder_thread(&self, thread_id: &str) -> bool {
        thread_id.trim().is_empty()
            || self
                .placeholder_thread_prefixes
                .iter()
                .any(|prefix| thread_id.starts_with(prefix.as_str()))
    }
}
