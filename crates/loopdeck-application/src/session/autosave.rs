//! Debounced write-back of edited code.

use loopdeck_core::repl::ReplStorage;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Debounce {
    /// Code most recently seen for the current REPL, saved or loaded.
    last_seen: Option<String>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every schedule and cancel; a timer only acts if it still
    /// carries the current generation.
    generation: u64,
}

/// Saves code changes after a quiet period.
///
/// Each change cancels the pending timer and starts a new one, so at most one
/// save is ever pending. A failed save is retried after another delay with
/// the same content unless newer content was scheduled meanwhile.
pub struct AutoSaver {
    storage: Arc<dyn ReplStorage>,
    delay: Duration,
    state: Mutex<Debounce>,
}

impl AutoSaver {
    pub fn new(storage: Arc<dyn ReplStorage>, delay: Duration) -> Self {
        Self {
            storage,
            delay,
            state: Mutex::new(Debounce::default()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Feeds an observed code value.
    ///
    /// While `suppressed` the value only becomes the new baseline. Otherwise a
    /// save is scheduled for `repl_id` when the code differs from the baseline.
    pub fn observe(self: &Arc<Self>, repl_id: Option<&str>, code: &str, suppressed: bool) {
        let generation = {
            let mut state = self.lock();
            if state.last_seen.as_deref() == Some(code) {
                return;
            }
            state.last_seen = Some(code.to_string());
            if suppressed {
                return;
            }
            if repl_id.is_none() {
                return;
            }
            state.generation += 1;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.generation
        };

        if let Some(repl_id) = repl_id {
            self.spawn_attempt(generation, repl_id.to_string(), code.to_string());
        }
    }

    /// Sets the baseline without scheduling anything (after a load or an
    /// explicit save).
    pub fn mark_seen(&self, code: &str) {
        self.lock().last_seen = Some(code.to_string());
    }

    /// Drops any pending save.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
            tracing::debug!("[AutoSaver] Pending save cancelled");
        }
    }

    /// True while a save timer is outstanding.
    pub fn has_pending(&self) -> bool {
        self.lock()
            .timer
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    fn spawn_attempt(self: &Arc<Self>, generation: u64, repl_id: String, code: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("[AutoSaver] No runtime, save of {} skipped", repl_id);
            return;
        };

        let this = Arc::clone(self);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(this.delay).await;
            if this.lock().generation != generation {
                return;
            }

            match this.storage.save_repl(&repl_id, &code, None).await {
                Ok(()) => {
                    tracing::debug!("[AutoSaver] Saved REPL {}", repl_id);
                    let mut state = this.lock();
                    if state.generation == generation {
                        state.timer = None;
                    }
                }
                Err(e) => {
                    tracing::warn!("[AutoSaver] Save of {} failed, retrying: {}", repl_id, e);
                    if this.lock().generation == generation {
                        this.spawn_attempt(generation, repl_id, code);
                    }
                }
            }
        });

        let mut state = self.lock();
        if state.generation == generation {
            state.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Debounce> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        if let Some(timer) = self.lock().timer.take() {
            timer.abort();
        }
    }
}
