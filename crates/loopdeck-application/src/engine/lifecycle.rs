//! Resource lifecycle manager.
//!
//! Owns the single live audio engine and editor, shared by every REPL. The
//! editor may be moved between containers; the in-memory code survives the
//! move. Init, attach and detach are serialized by one async mutex, while
//! engine state and the editor handle sit behind short `std::sync` locks that
//! are never held across an await or while listeners run.

use loopdeck_core::config::LoopdeckConfig;
use loopdeck_core::engine::{
    ContainerHandle, EditorFactory, EditorSurface, EngineState, LoadingProgress, PatternEngine,
    PolicyAction, decide, describe_error, missing_sample_name,
};
use loopdeck_core::error::{EvaluationError, LoopdeckError, Result};
use loopdeck_core::observer::{ListenerSet, Subscription};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Outcome of an AI-driven code update. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateResult {
    Success { code: String },
    Failure { error: String },
}

impl UpdateResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Sets a flag for the lifetime of the guard.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ResourceLifecycleManager {
    engine: Arc<dyn PatternEngine>,
    editors: Arc<dyn EditorFactory>,
    starter_code: String,
    lifecycle: tokio::sync::Mutex<()>,
    editor: Mutex<Option<Box<dyn EditorSurface>>>,
    state: Mutex<EngineState>,
    theme: Mutex<Option<String>>,
    progress: Mutex<LoadingProgress>,
    audio_ready: AtomicBool,
    initializing: AtomicBool,
    ai_update_in_flight: AtomicBool,
    state_listeners: ListenerSet<EngineState>,
    progress_listeners: ListenerSet<LoadingProgress>,
}

impl ResourceLifecycleManager {
    pub fn new(
        engine: Arc<dyn PatternEngine>,
        editors: Arc<dyn EditorFactory>,
        config: &LoopdeckConfig,
    ) -> Self {
        Self {
            engine,
            editors,
            starter_code: config.starter_code.clone(),
            lifecycle: tokio::sync::Mutex::new(()),
            editor: Mutex::new(None),
            state: Mutex::new(EngineState {
                code: config.starter_code.clone(),
                ..Default::default()
            }),
            theme: Mutex::new(None),
            progress: Mutex::new(LoadingProgress::new("Idle", 0)),
            audio_ready: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
            ai_update_in_flight: AtomicBool::new(false),
            state_listeners: ListenerSet::new(),
            progress_listeners: ListenerSet::new(),
        }
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Preloads the audio backend and creates an offscreen editor if none is
    /// attached. Idempotent; after a failure it may be called again.
    ///
    /// # Errors
    ///
    /// Returns `LoopdeckError::Attach` if the audio backend or the editor
    /// cannot be created.
    pub async fn init(&self) -> Result<()> {
        let _serial = self.lifecycle.lock().await;
        if self.is_ready() {
            return Ok(());
        }
        let _phase = FlagGuard::raise(&self.initializing);

        if !self.audio_ready.load(Ordering::SeqCst) {
            tracing::info!("[ResourceLifecycleManager] Preloading audio backend");
            self.report_progress(LoadingProgress::new("Loading audio engine", 0));
            let sink = |status: &str, progress: u8| {
                self.report_progress(LoadingProgress::new(status, progress));
            };
            self.engine.preload(&sink).await.map_err(|fault| {
                tracing::warn!("[ResourceLifecycleManager] Audio preload failed: {}", fault);
                LoopdeckError::attach(format!("audio backend: {}", fault))
            })?;
            self.audio_ready.store(true, Ordering::SeqCst);
        }

        if lock(&self.editor).is_none() {
            let code = lock(&self.state).code.clone();
            self.create_editor(&ContainerHandle::offscreen(), &code)?;
        }

        self.report_progress(LoadingProgress::ready());
        tracing::info!("[ResourceLifecycleManager] Ready");
        Ok(())
    }

    /// Binds the editor to `container`, moving it if it lives elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `LoopdeckError::Attach` if the editor cannot be created on the
    /// new container. The code is kept and a later attach may succeed.
    pub async fn attach(&self, container: ContainerHandle) -> Result<()> {
        let _serial = self.lifecycle.lock().await;
        let _phase = FlagGuard::raise(&self.initializing);

        let previous = {
            let mut editor = lock(&self.editor);
            if editor.as_ref().map(|e| e.container()) == Some(&container) {
                tracing::debug!(
                    "[ResourceLifecycleManager] Already attached to {}",
                    container.id()
                );
                return Ok(());
            }
            editor.take()
        };

        let code = match previous {
            Some(mut old) => {
                let code = old.code();
                tracing::debug!(
                    "[ResourceLifecycleManager] Moving editor {} -> {}",
                    old.container().id(),
                    container.id()
                );
                old.dispose();
                code
            }
            None => lock(&self.state).code.clone(),
        };

        // Recorded before creation so a failed attach keeps the moved code.
        // A playing evaluator keeps its pattern; a stopped one follows the editor.
        self.mutate(|state| {
            state.code = code.clone();
            if !state.started {
                state.active_code = code.clone();
            }
        });
        self.create_editor(&container, &code)?;
        Ok(())
    }

    /// Disposes the editor. Idempotent.
    pub async fn detach(&self) {
        let _serial = self.lifecycle.lock().await;
        let Some(mut editor) = lock(&self.editor).take() else {
            return;
        };
        let code = editor.code();
        tracing::debug!(
            "[ResourceLifecycleManager] Detaching from {}",
            editor.container().id()
        );
        editor.dispose();
        lock(&self.state).code = code;
    }

    fn create_editor(&self, container: &ContainerHandle, code: &str) -> Result<()> {
        let mut editor = self.editors.create(container, code).map_err(|fault| {
            tracing::warn!(
                "[ResourceLifecycleManager] Editor creation on {} failed: {}",
                container.id(),
                fault
            );
            LoopdeckError::attach(format!("editor: {}", fault))
        })?;
        if let Some(theme) = lock(&self.theme).as_deref() {
            editor.apply_theme(theme);
        }
        *lock(&self.editor) = Some(editor);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.audio_ready.load(Ordering::SeqCst) && lock(&self.editor).is_some()
    }

    /// True while init or attach is running.
    pub fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::SeqCst)
    }

    pub fn is_ai_update_in_flight(&self) -> bool {
        self.ai_update_in_flight.load(Ordering::SeqCst)
    }

    /// Container the editor is bound to, if any.
    pub fn container(&self) -> Option<ContainerHandle> {
        lock(&self.editor).as_ref().map(|e| e.container().clone())
    }

    // ============================================================================
    // Code and playback
    // ============================================================================

    /// Current code. The editor is the source of truth when it exists.
    pub fn get_code(&self) -> String {
        if let Some(editor) = lock(&self.editor).as_ref() {
            return editor.code();
        }
        lock(&self.state).code.clone()
    }

    /// Replaces the code without evaluating it.
    pub fn set_code(&self, code: &str) {
        if let Some(editor) = lock(&self.editor).as_mut() {
            editor.set_code(code);
        }
        self.mutate(|state| state.code = code.to_string());
    }

    /// Records code typed by the user into the editor.
    pub fn handle_editor_change(&self, code: &str) {
        self.mutate(|state| state.code = code.to_string());
    }

    /// Evaluates the current code and starts playback.
    pub async fn play(&self) -> Result<()> {
        let code = self.get_code();
        self.evaluate(&code, true).await?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.engine.stop().await;
        self.mutate(|state| state.started = false);
        tracing::debug!("[ResourceLifecycleManager] Stopped");
    }

    /// Evaluates `code`.
    ///
    /// With `autoplay` the result is reflected in the engine state and a
    /// resulting pattern starts playing. Without it the code is only
    /// validated and the state is left alone.
    pub async fn evaluate(
        &self,
        code: &str,
        autoplay: bool,
    ) -> std::result::Result<loopdeck_core::engine::Pattern, EvaluationError> {
        let before = self.state();
        if autoplay {
            self.mutate(EngineState::clear_errors);
        }

        let outcome = self.engine.evaluate(code, autoplay).await;
        let error = match outcome {
            Ok(Some(pattern)) => {
                if !autoplay {
                    return Ok(pattern);
                }
                // The engine may have reported a scheduler fault while evaluating.
                match self.state().error() {
                    None => {
                        self.mutate(|state| {
                            state.active_code = code.to_string();
                            state.started = true;
                        });
                        return Ok(pattern);
                    }
                    Some(message) => EvaluationError::Rejected {
                        code: code.to_string(),
                        message: message.to_string(),
                    },
                }
            }
            Ok(None) => EvaluationError::NoPattern {
                code: code.to_string(),
            },
            Err(fault) => EvaluationError::Rejected {
                code: code.to_string(),
                message: fault.message,
            },
        };

        tracing::debug!("[ResourceLifecycleManager] Evaluation failed: {}", error);
        if autoplay {
            let message = match &error {
                EvaluationError::Rejected { message, .. } => message.clone(),
                EvaluationError::NoPattern { .. } => error.to_string(),
            };
            let next = self.mutate(|state| {
                if state.scheduler_error.is_none() {
                    state.eval_error = Some(message.clone());
                }
                state.missing_sample = missing_sample_name(&message);
            });
            self.apply_error_policy(&before, &next).await;
        }
        Err(error)
    }

    /// Sets `code`, plays it and reports the outcome. Never fails.
    ///
    /// Errors raised while this runs do not stop playback.
    pub async fn update_and_play(&self, code: &str) -> UpdateResult {
        let _in_flight = FlagGuard::raise(&self.ai_update_in_flight);
        tracing::info!(
            "[ResourceLifecycleManager] AI update ({} bytes)",
            code.len()
        );

        self.set_code(code);
        let played = self.play().await;
        let state = self.state();

        let failure = match (played, state.error()) {
            (Ok(()), None) => None,
            (Ok(()), Some(message)) => Some(message.to_string()),
            (Err(LoopdeckError::Evaluation(EvaluationError::Rejected { message, .. })), _) => {
                Some(message)
            }
            (Err(e), _) => Some(e.to_string()),
        };

        match failure {
            None => UpdateResult::Success {
                code: code.to_string(),
            },
            Some(message) => UpdateResult::Failure {
                error: format!(
                    "{}\n\nThe code that failed was:\n{}",
                    describe_error(&message),
                    code
                ),
            },
        }
    }

    /// Stops playback, clears errors and restores the starter code.
    ///
    /// Runs as an initializing phase so the starter code is not autosaved
    /// over the current REPL.
    pub async fn reset(&self) {
        let _phase = FlagGuard::raise(&self.initializing);
        self.stop().await;
        self.mutate(EngineState::clear_errors);
        let starter = self.starter_code.clone();
        self.set_code(&starter);
    }

    pub fn clear_error(&self) {
        self.mutate(EngineState::clear_errors);
    }

    /// Records a fault raised by the running scheduler.
    pub async fn report_runtime_error(&self, message: &str) {
        tracing::debug!(
            "[ResourceLifecycleManager] Runtime error: {}",
            describe_error(message)
        );
        let before = self.state();
        let next = self.mutate(|state| {
            state.scheduler_error = Some(message.to_string());
            state.missing_sample = missing_sample_name(message);
        });
        self.apply_error_policy(&before, &next).await;
    }

    async fn apply_error_policy(&self, before: &EngineState, next: &EngineState) {
        if decide(before, next, self.is_ai_update_in_flight()) == PolicyAction::StopPlayback {
            tracing::info!("[ResourceLifecycleManager] New error while playing, stopping");
            self.stop().await;
        }
    }

    pub fn set_theme(&self, theme: &str) {
        *lock(&self.theme) = Some(theme.to_string());
        if let Some(editor) = lock(&self.editor).as_mut() {
            editor.apply_theme(theme);
        }
    }

    pub fn theme(&self) -> Option<String> {
        lock(&self.theme).clone()
    }

    // ============================================================================
    // Observation
    // ============================================================================

    /// Snapshot of the engine state.
    pub fn state(&self) -> EngineState {
        lock(&self.state).clone()
    }

    pub fn loading_progress(&self) -> LoadingProgress {
        lock(&self.progress).clone()
    }

    /// Registers `callback` for every engine state change.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EngineState) + Send + Sync + 'static,
    {
        self.state_listeners.subscribe(callback)
    }

    /// Registers `callback` for loading progress. If loading already finished
    /// it is called once with `("Ready", 100)` right away.
    pub fn on_loading_progress<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LoadingProgress) + Send + Sync + 'static,
    {
        if self.is_ready() {
            callback(&LoadingProgress::ready());
        }
        self.progress_listeners.subscribe(callback)
    }

    fn report_progress(&self, progress: LoadingProgress) {
        *lock(&self.progress) = progress.clone();
        self.progress_listeners.notify(&progress);
    }

    /// Applies `f` to the state and notifies listeners with the result.
    fn mutate<F>(&self, f: F) -> EngineState
    where
        F: FnOnce(&mut EngineState),
    {
        let next = {
            let mut state = lock(&self.state);
            f(&mut state);
            state.clone()
        };
        self.state_listeners.notify(&next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_result_status() {
        assert!(
            UpdateResult::Success {
                code: "x".to_string()
            }
            .is_success()
        );
        assert!(
            !UpdateResult::Failure {
                error: "boom".to_string()
            }
            .is_success()
        );
    }

    #[test]
    fn test_flag_guard_resets() {
        let flag = AtomicBool::new(false);
        {
            let _guard = FlagGuard::raise(&flag);
            assert!(flag.load(Ordering::SeqCst));
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
