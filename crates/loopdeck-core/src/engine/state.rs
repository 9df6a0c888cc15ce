use serde::{Deserialize, Serialize};

/// Ephemeral state of the live engine.
///
/// Owned by the lifecycle manager; observers only ever see snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    /// Live editor buffer
    pub code: String,
    /// Last code that was actually evaluated
    pub active_code: String,
    /// Whether a pattern is currently scheduled
    pub started: bool,
    pub eval_error: Option<String>,
    pub scheduler_error: Option<String>,
    /// Name of an audio asset the engine could not resolve
    pub missing_sample: Option<String>,
}

impl EngineState {
    /// The eval error if present, otherwise the scheduler error.
    pub fn error(&self) -> Option<&str> {
        self.eval_error
            .as_deref()
            .or(self.scheduler_error.as_deref())
    }

    pub fn has_error(&self) -> bool {
        self.error().is_some()
    }

    /// Playing with no eval or scheduler error.
    pub fn is_playing_cleanly(&self) -> bool {
        self.started && !self.has_error()
    }

    pub fn clear_errors(&mut self) {
        self.eval_error = None;
        self.scheduler_error = None;
        self.missing_sample = None;
    }
}

/// One loading-progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub status: String,
    /// 0..=100; 100 implies the engine is ready.
    pub progress: u8,
}

impl LoadingProgress {
    pub fn new(status: impl Into<String>, progress: u8) -> Self {
        Self {
            status: status.into(),
            progress: progress.min(100),
        }
    }

    pub fn ready() -> Self {
        Self::new("Ready", 100)
    }

    pub fn is_ready(&self) -> bool {
        self.progress >= 100
    }
}
