use super::autosave::AutoSaver;
use crate::engine::ResourceLifecycleManager;
use loopdeck_core::config::LoopdeckConfig;
use loopdeck_core::error::{LoopdeckError, Result};
use loopdeck_core::observer::Subscription;
use loopdeck_core::repl::{ReplStorage, ReplSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Manages which REPL is loaded into the shared engine.
///
/// `ReplSessionManager` is responsible for:
/// - Resolving the REPL to show on startup
/// - Switching REPLs (saving the outgoing code first)
/// - Creating, archiving and deleting REPLs
/// - Keeping the active conversation thread associated with a REPL
pub struct ReplSessionManager {
    storage: Arc<dyn ReplStorage>,
    lifecycle: Arc<ResourceLifecycleManager>,
    autosaver: Arc<AutoSaver>,
    config: LoopdeckConfig,
    current_repl: Mutex<Option<String>>,
    /// REPL whose code is currently in the engine.
    loaded_repl: Mutex<Option<String>>,
    current_thread: Mutex<Option<String>>,
    loading: AtomicBool,
    initialized: AtomicBool,
    /// Serializes switches so save-before-switch cannot interleave.
    switching: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ReplSessionManager {
    /// Creates a new `ReplSessionManager`.
    ///
    /// # Arguments
    ///
    /// * `storage` - The backend selected for this session
    /// * `lifecycle` - The shared engine resource
    /// * `config` - Starter code, placeholder thread prefixes and autosave delay
    pub fn new(
        storage: Arc<dyn ReplStorage>,
        lifecycle: Arc<ResourceLifecycleManager>,
        config: LoopdeckConfig,
    ) -> Self {
        let autosaver = Arc::new(AutoSaver::new(
            storage.clone(),
            Duration::from_millis(config.autosave_delay_ms),
        ));
        Self {
            storage,
            lifecycle,
            autosaver,
            config,
            current_repl: Mutex::new(None),
            loaded_repl: Mutex::new(None),
            current_thread: Mutex::new(None),
            loading: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            switching: tokio::sync::Mutex::new(()),
        }
    }

    /// Subscribes autosave to engine state changes.
    ///
    /// Saves are suppressed while the engine initializes or a REPL is loading,
    /// and go only to the current REPL once its code is in the engine.
    pub fn start_autosave(self: &Arc<Self>) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.lifecycle.on_state_change(move |state| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let suppressed = this.lifecycle.is_initializing() || this.is_loading();
            let repl_id = this.loaded_current_repl_id();
            this.autosaver
                .observe(repl_id.as_deref(), &state.code, suppressed);
        })
    }

    pub fn autosaver(&self) -> &Arc<AutoSaver> {
        &self.autosaver
    }

    pub fn current_repl_id(&self) -> Option<String> {
        lock(&self.current_repl).clone()
    }

    /// The current REPL id, if that REPL's code is what the engine holds.
    fn loaded_current_repl_id(&self) -> Option<String> {
        let loaded = lock(&self.loaded_repl).clone();
        let current = self.current_repl_id();
        loaded.filter(|id| current.as_deref() == Some(id.as_str()))
    }

    pub fn current_thread_id(&self) -> Option<String> {
        lock(&self.current_thread).clone()
    }

    /// True while a REPL's code is being loaded into the engine.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    // ============================================================================
    // REPL selection
    // ============================================================================

    /// Makes `id` the current REPL.
    ///
    /// The outgoing REPL's code is saved (and the save awaited) before the
    /// switch. The incoming code is loaded if the engine is ready.
    pub async fn set_repl_id(&self, id: &str) -> Result<()> {
        let _switch = self.switching.lock().await;
        self.switch_to(id).await
    }

    async fn switch_to(&self, id: &str) -> Result<()> {
        if self.current_repl_id().as_deref() == Some(id) {
            return Ok(());
        }
        tracing::debug!(
            "[ReplSessionManager] Switching {:?} -> {}",
            self.current_repl_id(),
            id
        );

        self.save_current().await?;
        self.make_current(id).await;
        self.load_repl_code(id).await;
        Ok(())
    }

    /// Creates a REPL with `code` (or the starter code) and switches to it.
    ///
    /// The active thread, if any and not yet associated, is attached to it.
    pub async fn create_new_repl(&self, code: Option<&str>) -> Result<String> {
        let _switch = self.switching.lock().await;

        self.save_current().await?;
        let code = code.unwrap_or(&self.config.starter_code);
        let id = self.storage.create_repl(code, None).await?;
        tracing::info!("[ReplSessionManager] Created REPL {}", id);

        self.make_current(&id).await;
        if self.lifecycle.is_ready() {
            self.load_code(&id, code);
        }

        if let Some(thread_id) = self.current_thread_id() {
            self.storage.attach_thread_to_repl(&thread_id, &id).await?;
        }
        Ok(id)
    }

    /// Resolves the REPL to show on startup and makes it current.
    ///
    /// Resolution order:
    /// 1. The active pointer, if it names a REPL with edited code
    /// 2. The most recent REPL with edited code
    /// 3. The most recent REPL
    ///
    /// Runs once; later calls return the current REPL id.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(id))`: A REPL was found and loaded
    /// - `Ok(None)`: Storage holds no REPLs
    pub async fn initialize_repl(&self) -> Result<Option<String>> {
        let _switch = self.switching.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(self.current_repl_id());
        }

        let resolved = self.resolve_startup_repl().await?;
        self.initialized.store(true, Ordering::SeqCst);

        let Some(id) = resolved else {
            tracing::info!("[ReplSessionManager] No REPLs to restore");
            return Ok(None);
        };
        tracing::info!("[ReplSessionManager] Restoring REPL {}", id);
        self.make_current(&id).await;
        self.load_repl_code(&id).await;
        Ok(Some(id))
    }

    async fn resolve_startup_repl(&self) -> Result<Option<String>> {
        if let Some(pointer) = self.storage.get_active_repl_id().await? {
            if let Some(repl) = self.storage.get_repl(&pointer).await? {
                if !self.config.is_default_code(&repl.code) {
                    return Ok(Some(pointer));
                }
            }
        }

        let listing = self.storage.get_all_repls().await?;
        for summary in &listing {
            if let Some(repl) = self.storage.get_repl(&summary.id).await? {
                if !self.config.is_default_code(&repl.code) {
                    return Ok(Some(summary.id.clone()));
                }
            }
        }

        Ok(listing.first().map(|s| s.id.clone()))
    }

    /// Loads the current REPL's code into the engine if it is not there yet.
    ///
    /// Called once the engine becomes ready after a REPL was selected.
    pub async fn sync_engine(&self) {
        let _switch = self.switching.lock().await;
        let Some(id) = self.current_repl_id() else {
            return;
        };
        let already_loaded = lock(&self.loaded_repl).as_deref() == Some(id.as_str());
        if !already_loaded {
            self.load_repl_code(&id).await;
        }
    }

    // ============================================================================
    // REPL management
    // ============================================================================

    /// Deletes a REPL. A replacement is never selected automatically.
    pub async fn delete_repl(&self, id: &str) -> Result<()> {
        let _switch = self.switching.lock().await;
        self.storage.delete_repl(id).await?;

        if self.current_repl_id().as_deref() == Some(id) {
            self.autosaver.cancel();
            *lock(&self.current_repl) = None;
            *lock(&self.loaded_repl) = None;
            tracing::debug!("[ReplSessionManager] Current REPL {} deleted", id);
        }
        Ok(())
    }

    pub async fn archive_repl(&self, id: &str) -> Result<()> {
        self.storage.archive_repl(id).await
    }

    pub async fn unarchive_repl(&self, id: &str) -> Result<()> {
        self.storage.unarchive_repl(id).await
    }

    /// Renames a REPL, keeping its code.
    ///
    /// # Errors
    ///
    /// Returns `LoopdeckError::NotFound` if the REPL doesn't exist.
    pub async fn rename_repl(&self, id: &str, name: &str) -> Result<()> {
        let repl = self
            .storage
            .get_repl(id)
            .await?
            .ok_or_else(|| LoopdeckError::not_found("Repl", id))?;

        let code = if lock(&self.loaded_repl).as_deref() == Some(id) {
            self.lifecycle.get_code()
        } else {
            repl.code
        };
        self.storage.save_repl(id, &code, Some(name)).await
    }

    pub async fn list_repls(&self) -> Result<Vec<ReplSummary>> {
        self.storage.get_all_repls().await
    }

    // ============================================================================
    // Thread association
    // ============================================================================

    /// Records the active conversation thread.
    ///
    /// A thread bound to an archived REPL brings that REPL back and selects
    /// it. An unbound thread is attached to the current REPL.
    pub async fn set_thread_id(&self, thread_id: Option<&str>) -> Result<()> {
        {
            let mut current = lock(&self.current_thread);
            if current.as_deref() == thread_id {
                return Ok(());
            }
            *current = thread_id.map(str::to_string);
        }

        let Some(thread_id) = thread_id else {
            return Ok(());
        };
        if self.config.is_placeholder_thread(thread_id) {
            return Ok(());
        }

        match self.storage.get_thread_repl_id(thread_id).await? {
            Some(repl_id) => {
                let archived = self
                    .storage
                    .get_repl(&repl_id)
                    .await?
                    .map(|r| r.archived)
                    .unwrap_or(false);
                if archived {
                    tracing::info!(
                        "[ReplSessionManager] Thread {} revisits archived REPL {}",
                        thread_id,
                        repl_id
                    );
                    self.storage.unarchive_repl(&repl_id).await?;
                    self.set_repl_id(&repl_id).await?;
                }
            }
            None => {
                if let Some(repl_id) = self.current_repl_id() {
                    self.storage
                        .attach_thread_to_repl(thread_id, &repl_id)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// True if `thread_id` is bound to a REPL other than the current one.
    pub async fn is_thread_on_different_repl(&self, thread_id: &str) -> Result<bool> {
        let bound = self.storage.get_thread_repl_id(thread_id).await?;
        Ok(match bound {
            Some(repl_id) => self.current_repl_id().as_deref() != Some(repl_id.as_str()),
            None => false,
        })
    }

    /// Most recently attached thread for `repl_id`, for deep links.
    pub async fn thread_for_repl(&self, repl_id: &str) -> Result<Option<String>> {
        self.storage.get_thread_for_repl(repl_id).await
    }

    // ============================================================================
    // Internals
    // ============================================================================

    /// Saves the engine's code into the current REPL and drops any pending
    /// autosave. Nothing is written unless that REPL's code is in the engine.
    async fn save_current(&self) -> Result<()> {
        self.autosaver.cancel();

        let Some(id) = self.loaded_current_repl_id() else {
            return Ok(());
        };

        let code = self.lifecycle.get_code();
        self.storage.save_repl(&id, &code, None).await?;
        self.autosaver.mark_seen(&code);
        tracing::debug!("[ReplSessionManager] Saved outgoing REPL {}", id);
        Ok(())
    }

    async fn make_current(&self, id: &str) {
        self.autosaver.cancel();
        *lock(&self.current_repl) = Some(id.to_string());
        *lock(&self.loaded_repl) = None;
        if let Err(e) = self.storage.set_active_repl_id(id).await {
            tracing::warn!("[ReplSessionManager] Failed to store active pointer: {}", e);
        }
    }

    async fn load_repl_code(&self, id: &str) {
        if !self.lifecycle.is_ready() {
            tracing::debug!("[ReplSessionManager] Engine not ready, deferring load of {}", id);
            return;
        }

        let code = match self.storage.get_repl(id).await {
            Ok(Some(repl)) => repl.code,
            Ok(None) => {
                tracing::warn!("[ReplSessionManager] REPL {} not found, using starter code", id);
                self.config.starter_code.clone()
            }
            Err(e) => {
                tracing::warn!(
                    "[ReplSessionManager] Failed to load REPL {}: {}, using starter code",
                    id,
                    e
                );
                self.config.starter_code.clone()
            }
        };
        self.load_code(id, &code);
    }

    fn load_code(&self, id: &str, code: &str) {
        self.loading.store(true, Ordering::SeqCst);
        self.lifecycle.set_code(code);
        self.autosaver.mark_seen(code);
        self.loading.store(false, Ordering::SeqCst);
        *lock(&self.loaded_repl) = Some(id.to_string());
    }
}
