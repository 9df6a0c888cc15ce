//! REPL storage trait.
//!
//! Defines the uniform interface over the synced and local backends.

use super::model::{Repl, ReplListChanged, ReplSummary};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Identity provider state, used only as a readiness gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    /// A user is signed in.
    pub is_authenticated: bool,
    /// The auth check has completed (distinct from being signed in).
    pub is_auth_resolved: bool,
    /// Opaque per-user id keying the synced store.
    pub user_id: Option<String>,
}

impl AuthState {
    pub fn anonymous() -> Self {
        Self {
            is_authenticated: false,
            is_auth_resolved: true,
            user_id: None,
        }
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            is_authenticated: true,
            is_auth_resolved: true,
            user_id: Some(user_id.into()),
        }
    }
}

/// Readiness flags reported by a storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageReadiness {
    pub is_authenticated: bool,
    pub is_auth_resolved: bool,
    /// Durable data, if any, has finished loading.
    pub is_loaded: bool,
}

/// An abstract store of REPLs, thread associations and the active-REPL pointer.
///
/// Exactly two implementations exist (synced and local); the caller selects
/// one once auth state resolves and holds it for the rest of the session.
///
/// # Implementation Notes
///
/// - Upserts are last-write-wins per REPL id.
/// - `attach_thread_to_repl` never overwrites an existing association.
/// - The synced implementation never surfaces write failures; it falls back to
///   the local store and logs.
#[async_trait]
pub trait ReplStorage: Send + Sync {
    /// Finds a REPL by id, archived or not.
    async fn get_repl(&self, id: &str) -> Result<Option<Repl>>;

    /// Lists non-archived REPLs, most recently updated first.
    async fn get_all_repls(&self) -> Result<Vec<ReplSummary>>;

    /// Inserts or updates a REPL.
    ///
    /// When `name` is `None` the stored name is kept. `created_at` and
    /// `archived` are preserved; `last_updated` is always bumped.
    async fn save_repl(&self, id: &str, code: &str, name: Option<&str>) -> Result<()>;

    /// Creates a REPL with a freshly generated id and returns the id.
    async fn create_repl(&self, code: &str, name: Option<&str>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.save_repl(&id, code, name).await?;
        Ok(id)
    }

    /// Hides a REPL from listings without touching code, name or timestamps.
    async fn archive_repl(&self, id: &str) -> Result<()>;

    /// Reverses `archive_repl`.
    async fn unarchive_repl(&self, id: &str) -> Result<()>;

    /// Removes a REPL and its thread associations.
    async fn delete_repl(&self, id: &str) -> Result<()>;

    /// Associates `thread_id` with `repl_id` unless the thread is already
    /// associated or is a placeholder id.
    async fn attach_thread_to_repl(&self, thread_id: &str, repl_id: &str) -> Result<()>;

    async fn get_thread_repl_id(&self, thread_id: &str) -> Result<Option<String>>;

    /// Most recently attached thread for `repl_id`.
    async fn get_thread_for_repl(&self, repl_id: &str) -> Result<Option<String>>;

    async fn get_active_repl_id(&self) -> Result<Option<String>>;

    async fn set_active_repl_id(&self, id: &str) -> Result<()>;

    fn readiness(&self) -> StorageReadiness;

    /// Push notifications for listing changes.
    fn subscribe_repl_list(&self) -> broadcast::Receiver<ReplListChanged>;
}
