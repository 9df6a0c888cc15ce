//! Startup wiring: storage selection, migration, engine init and REPL restore.

use crate::engine::ResourceLifecycleManager;
use crate::session::ReplSessionManager;
use loopdeck_core::config::LoopdeckConfig;
use loopdeck_core::engine::{EditorFactory, PatternEngine};
use loopdeck_core::error::{LoopdeckError, Result};
use loopdeck_core::observer::Subscription;
use loopdeck_core::repl::{AuthState, ReplStorage};
use loopdeck_infrastructure::{
    AccountGraph, LocalBackend, MigrationOutcome, MigrationRunner, SyncedBackend,
};
use std::sync::Arc;

/// The backend chosen for a session.
#[derive(Clone)]
pub enum SelectedStorage {
    Local(Arc<LocalBackend>),
    Synced(Arc<SyncedBackend>),
}

impl SelectedStorage {
    pub fn as_storage(&self) -> Arc<dyn ReplStorage> {
        match self {
            Self::Local(local) => local.clone() as Arc<dyn ReplStorage>,
            Self::Synced(synced) => synced.clone() as Arc<dyn ReplStorage>,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced(_))
    }
}

/// Picks the backend for `auth`. Made once per session.
///
/// # Returns
///
/// - `Ok(None)`: Auth has not resolved yet
/// - `Ok(Some(SelectedStorage::Synced))`: A user is signed in
/// - `Ok(Some(SelectedStorage::Local))`: Anonymous session
pub fn select_storage(
    auth: &AuthState,
    local: Arc<LocalBackend>,
    graph: Arc<dyn AccountGraph>,
) -> Result<Option<SelectedStorage>> {
    if !auth.is_auth_resolved {
        return Ok(None);
    }
    if auth.is_authenticated {
        let synced = SyncedBackend::new(graph, local, auth.clone())?;
        return Ok(Some(SelectedStorage::Synced(Arc::new(synced))));
    }
    Ok(Some(SelectedStorage::Local(local)))
}

/// A running session: storage, engine and REPL manager wired together.
pub struct LoopdeckSession {
    pub storage: SelectedStorage,
    pub lifecycle: Arc<ResourceLifecycleManager>,
    pub sessions: Arc<ReplSessionManager>,
    pub migration: Option<MigrationOutcome>,
    autosave: Subscription,
}

impl LoopdeckSession {
    /// Stops autosave. Pending saves already scheduled still run.
    pub fn shutdown(&self) {
        self.autosave.unsubscribe();
    }
}

pub struct SessionBootstrap {
    config: LoopdeckConfig,
    local: Arc<LocalBackend>,
    graph: Arc<dyn AccountGraph>,
    engine: Arc<dyn PatternEngine>,
    editors: Arc<dyn EditorFactory>,
}

impl SessionBootstrap {
    pub fn new(
        config: LoopdeckConfig,
        local: Arc<LocalBackend>,
        graph: Arc<dyn AccountGraph>,
        engine: Arc<dyn PatternEngine>,
        editors: Arc<dyn EditorFactory>,
    ) -> Self {
        Self {
            config,
            local,
            graph,
            engine,
            editors,
        }
    }

    /// Starts a session for `auth`.
    ///
    /// A signed-in user's account is synced first and local REPLs are
    /// migrated into it. If the account cannot be loaded the session runs on
    /// the local backend. When no REPL can be restored a new one is created
    /// with the starter code.
    ///
    /// # Errors
    ///
    /// Returns an error if auth has not resolved, the engine cannot be
    /// initialized, or storage fails while restoring.
    pub async fn start(&self, auth: &AuthState) -> Result<LoopdeckSession> {
        let selected = select_storage(auth, self.local.clone(), self.graph.clone())?
            .ok_or_else(|| LoopdeckError::internal("auth state has not resolved"))?;

        let (storage, migration) = match selected {
            SelectedStorage::Synced(synced) => match synced.sync().await {
                Ok(()) => {
                    let outcome =
                        MigrationRunner::new(self.local.clone(), synced.clone()).run().await;
                    tracing::info!("[SessionBootstrap] Migration: {:?}", outcome);
                    (SelectedStorage::Synced(synced), Some(outcome))
                }
                Err(e) => {
                    tracing::warn!(
                        "[SessionBootstrap] Account sync failed, using local store: {}",
                        e
                    );
                    (SelectedStorage::Local(self.local.clone()), None)
                }
            },
            local => (local, None),
        };

        let lifecycle = Arc::new(ResourceLifecycleManager::new(
            self.engine.clone(),
            self.editors.clone(),
            &self.config,
        ));
        lifecycle.init().await?;

        let sessions = Arc::new(ReplSessionManager::new(
            storage.as_storage(),
            lifecycle.clone(),
            self.config.clone(),
        ));
        let autosave = sessions.start_autosave();

        match sessions.initialize_repl().await? {
            Some(id) => tracing::info!("[SessionBootstrap] Restored REPL {}", id),
            None => {
                let id = sessions.create_new_repl(None).await?;
                tracing::info!("[SessionBootstrap] Started fresh REPL {}", id);
            }
        }

        Ok(LoopdeckSession {
            storage,
            lifecycle,
            sessions,
            migration,
            autosave,
        })
    }
}
