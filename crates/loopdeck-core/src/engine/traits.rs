//! Contracts for the external pattern engine and editor surface.
//!
//! The core never interprets the pattern language; it only needs to know
//! whether evaluation threw, produced a pattern, or produced nothing.

use async_trait::async_trait;
use thiserror::Error;

/// Error raised by the engine or editor collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineFault {
    pub message: String,
}

impl EngineFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Opaque handle to a pattern produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    label: String,
}

impl Pattern {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Loading progress sink passed to `PatternEngine::preload`.
pub type ProgressSink<'a> = &'a (dyn Fn(&str, u8) + Send + Sync);

/// The audio side of the engine: asset loading, evaluation and scheduling.
#[async_trait]
pub trait PatternEngine: Send + Sync {
    /// Creates the audio context and preloads samples, reporting progress.
    async fn preload(&self, progress: ProgressSink<'_>) -> Result<(), EngineFault>;

    /// Evaluates `code`.
    ///
    /// - `Ok(Some(_))`: a playable pattern; scheduled when `autostart` is set
    /// - `Ok(None)`: the code ran but produced no pattern
    /// - `Err(_)`: the code threw (syntax or runtime error)
    async fn evaluate(&self, code: &str, autostart: bool) -> Result<Option<Pattern>, EngineFault>;

    /// Stops the scheduler.
    async fn stop(&self);
}

/// Identifies the host container an editor is mounted into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    const OFFSCREEN: &'static str = "offscreen";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Container used when `init()` runs before any view has mounted.
    pub fn offscreen() -> Self {
        Self(Self::OFFSCREEN.to_string())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn is_offscreen(&self) -> bool {
        self.0 == Self::OFFSCREEN
    }
}

/// A mounted code editor.
pub trait EditorSurface: Send {
    fn container(&self) -> &ContainerHandle;

    fn code(&self) -> String;

    fn set_code(&mut self, code: &str);

    fn apply_theme(&mut self, theme: &str);

    /// Releases editor resources. Called exactly once before the editor is dropped.
    fn dispose(&mut self);
}

/// Creates editors bound to a container.
pub trait EditorFactory: Send + Sync {
    fn create(
        &self,
        container: &ContainerHandle,
        initial_code: &str,
    ) -> Result<Box<dyn EditorSurface>, EngineFault>;
}
