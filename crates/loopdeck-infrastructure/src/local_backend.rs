//! Local REPL storage over a string key/value store.
//!
//! Used for anonymous sessions and as the write fallback of the synced
//! backend. The local store has no soft delete: archiving removes the record
//! and unarchiving does nothing.
//!
//! Key layout:
//! ```text
//! loopdeck:repl:<id>            versioned REPL record JSON
//! loopdeck:thread:<thread_id>   versioned thread record JSON
//! loopdeck:active-repl          raw REPL id
//! loopdeck:migration-done       "true" once migrated
//! loopdeck:migration-started    "true" while a migration is unfinished
//! loopdeck:sync-pending:<user>  synced writes not yet pushed, JSON list
//! ```

use crate::dto::{decode_repl, decode_thread, encode_repl, encode_thread};
use crate::storage::{KeyValueStore, MemoryKeyStore};
use async_trait::async_trait;
use loopdeck_core::config::LoopdeckConfig;
use loopdeck_core::error::Result;
use loopdeck_core::repl::{
    LogicalClock, Repl, ReplListChanged, ReplStorage, ReplSummary, StorageReadiness,
    ThreadAssociation, sort_by_recency,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const REPL_KEY_PREFIX: &str = "loopdeck:repl:";
pub const THREAD_KEY_PREFIX: &str = "loopdeck:thread:";
pub const ACTIVE_REPL_KEY: &str = "loopdeck:active-repl";
pub const MIGRATION_DONE_KEY: &str = "loopdeck:migration-done";
pub const MIGRATION_STARTED_KEY: &str = "loopdeck:migration-started";
pub const SYNC_PENDING_KEY_PREFIX: &str = "loopdeck:sync-pending:";

const CHANNEL_CAPACITY: usize = 64;

fn repl_key(id: &str) -> String {
    format!("{}{}", REPL_KEY_PREFIX, id)
}

fn thread_key(thread_id: &str) -> String {
    format!("{}{}", THREAD_KEY_PREFIX, thread_id)
}

pub struct LocalBackend {
    store: Arc<dyn KeyValueStore>,
    config: LoopdeckConfig,
    clock: LogicalClock,
    changes: broadcast::Sender<ReplListChanged>,
}

impl LocalBackend {
    /// Opens a backend over `store`.
    ///
    /// The logical clock starts after the newest stamp already stored so
    /// records written now always sort ahead of older ones.
    pub fn new(store: Arc<dyn KeyValueStore>, config: LoopdeckConfig) -> Result<Self> {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        let backend = Self {
            store,
            config,
            clock: LogicalClock::new(),
            changes,
        };

        let newest = backend
            .list_all_repls()?
            .iter()
            .map(|r| r.last_updated)
            .chain(backend.all_thread_associations()?.iter().map(|a| a.attached_at))
            .max()
            .unwrap_or(0);
        backend.clock.observe(newest);

        Ok(backend)
    }

    /// Ephemeral backend over a fresh `MemoryKeyStore`.
    pub fn in_memory(config: LoopdeckConfig) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            store: Arc::new(MemoryKeyStore::new()),
            config,
            clock: LogicalClock::new(),
            changes,
        }
    }

    pub fn config(&self) -> &LoopdeckConfig {
        &self.config
    }

    pub(crate) fn notify(&self, event: ReplListChanged) {
        // No receivers is fine.
        let _ = self.changes.send(event);
    }

    pub fn read_repl(&self, id: &str) -> Result<Option<Repl>> {
        let Some(raw) = self.store.get(&repl_key(id))? else {
            return Ok(None);
        };
        match decode_repl(id, &raw) {
            Ok(repl) => Ok(Some(repl)),
            Err(e) => {
                tracing::warn!("[LocalBackend] Skipping undecodable REPL {}: {}", id, e);
                Ok(None)
            }
        }
    }

    /// Writes a full record, keeping its timestamps as given.
    pub fn put_repl(&self, repl: &Repl) -> Result<()> {
        self.clock.observe(repl.last_updated);
        self.store.set(&repl_key(&repl.id), &encode_repl(repl)?)
    }

    /// Every stored REPL as a full record, newest first.
    pub fn list_all_repls(&self) -> Result<Vec<Repl>> {
        let mut repls = Vec::new();
        for key in self.store.keys_with_prefix(REPL_KEY_PREFIX)? {
            let id = &key[REPL_KEY_PREFIX.len()..];
            if let Some(repl) = self.read_repl(id)? {
                repls.push(repl);
            }
        }
        repls.sort_by(|a, b| {
            b.last_updated
                .cmp(&a.last_updated)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(repls)
    }

    pub fn read_thread(&self, thread_id: &str) -> Result<Option<ThreadAssociation>> {
        let Some(raw) = self.store.get(&thread_key(thread_id))? else {
            return Ok(None);
        };
        match decode_thread(thread_id, &raw) {
            Ok(assoc) => Ok(Some(assoc)),
            Err(e) => {
                tracing::warn!(
                    "[LocalBackend] Skipping undecodable thread {}: {}",
                    thread_id,
                    e
                );
                Ok(None)
            }
        }
    }

    pub fn put_thread(&self, assoc: &ThreadAssociation) -> Result<()> {
        self.clock.observe(assoc.attached_at);
        self.store
            .set(&thread_key(&assoc.thread_id), &encode_thread(assoc)?)
    }

    pub fn all_thread_associations(&self) -> Result<Vec<ThreadAssociation>> {
        let mut associations = Vec::new();
        for key in self.store.keys_with_prefix(THREAD_KEY_PREFIX)? {
            let thread_id = &key[THREAD_KEY_PREFIX.len()..];
            if let Some(assoc) = self.read_thread(thread_id)? {
                associations.push(assoc);
            }
        }
        Ok(associations)
    }

    /// Removes every REPL and thread association. The active pointer and the
    /// migration flag are kept.
    pub fn clear_repls_and_threads(&self) -> Result<usize> {
        let removed = self.store.remove_with_prefix(REPL_KEY_PREFIX)?
            + self.store.remove_with_prefix(THREAD_KEY_PREFIX)?;
        tracing::debug!("[LocalBackend] Cleared {} local records", removed);
        self.notify(ReplListChanged::Reloaded);
        Ok(removed)
    }

    pub fn is_migration_done(&self) -> Result<bool> {
        Ok(self.store.get(MIGRATION_DONE_KEY)?.as_deref() == Some("true"))
    }

    /// Sets the done flag and drops the started marker.
    pub fn mark_migration_done(&self) -> Result<()> {
        self.store.set(MIGRATION_DONE_KEY, "true")?;
        self.store.remove(MIGRATION_STARTED_KEY)
    }

    /// True if a migration pushed records and has not finished since.
    pub fn is_migration_started(&self) -> Result<bool> {
        Ok(self.store.get(MIGRATION_STARTED_KEY)?.as_deref() == Some("true"))
    }

    pub fn mark_migration_started(&self) -> Result<()> {
        self.store.set(MIGRATION_STARTED_KEY, "true")
    }

    /// Raw pending-write journal of the synced backend for `user_id`.
    pub fn read_sync_pending(&self, user_id: &str) -> Result<Option<String>> {
        self.store.get(&format!("{}{}", SYNC_PENDING_KEY_PREFIX, user_id))
    }

    /// Stores the journal, or removes it when `raw` is `None`.
    pub fn write_sync_pending(&self, user_id: &str, raw: Option<&str>) -> Result<()> {
        let key = format!("{}{}", SYNC_PENDING_KEY_PREFIX, user_id);
        match raw {
            Some(raw) => self.store.set(&key, raw),
            None => self.store.remove(&key),
        }
    }

    pub fn read_active_repl_id(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(ACTIVE_REPL_KEY)?
            .filter(|id| !id.trim().is_empty()))
    }

    pub fn write_active_repl_id(&self, id: &str) -> Result<()> {
        self.store.set(ACTIVE_REPL_KEY, id)
    }

    /// Builds the record `save_repl` would write, using this backend's clock.
    pub fn next_record(
        &self,
        existing: Option<Repl>,
        id: &str,
        code: &str,
        name: Option<&str>,
    ) -> Repl {
        next_record(&self.clock, existing, id, code, name)
    }

    fn remove_repl_and_threads(&self, id: &str) -> Result<()> {
        self.store.remove(&repl_key(id))?;
        for assoc in self.all_thread_associations()? {
            if assoc.repl_id == id {
                self.store.remove(&thread_key(&assoc.thread_id))?;
            }
        }
        Ok(())
    }
}

/// Applies upsert semantics: name and `created_at` survive when not supplied,
/// `archived` is preserved and `last_updated` always advances.
pub(crate) fn next_record(
    clock: &LogicalClock,
    existing: Option<Repl>,
    id: &str,
    code: &str,
    name: Option<&str>,
) -> Repl {
    let now = clock.tick();
    match existing {
        Some(mut repl) => {
            repl.code = code.to_string();
            if let Some(name) = name {
                repl.name = Some(name.to_string());
            }
            repl.last_updated = now.max(repl.last_updated + 1);
            repl
        }
        None => Repl {
            id: id.to_string(),
            code: code.to_string(),
            name: name.map(str::to_string),
            created_at: now,
            last_updated: now,
            archived: false,
        },
    }
}

/// Most recently attached thread among `associations` for `repl_id`.
pub(crate) fn latest_thread_for<'a>(
    associations: impl IntoIterator<Item = &'a ThreadAssociation>,
    repl_id: &str,
) -> Option<String> {
    associations
        .into_iter()
        .filter(|a| a.repl_id == repl_id)
        .max_by(|a, b| {
            a.attached_at
                .cmp(&b.attached_at)
                .then_with(|| b.thread_id.cmp(&a.thread_id))
        })
        .map(|a| a.thread_id.clone())
}

#[async_trait]
impl ReplStorage for LocalBackend {
    async fn get_repl(&self, id: &str) -> Result<Option<Repl>> {
        self.read_repl(id)
    }

    async fn get_all_repls(&self) -> Result<Vec<ReplSummary>> {
        let mut summaries: Vec<ReplSummary> = self
            .list_all_repls()?
            .iter()
            .filter(|r| !r.archived)
            .map(Repl::summary)
            .collect();
        sort_by_recency(&mut summaries);
        Ok(summaries)
    }

    async fn save_repl(&self, id: &str, code: &str, name: Option<&str>) -> Result<()> {
        let record = self.next_record(self.read_repl(id)?, id, code, name);
        self.put_repl(&record)?;
        tracing::debug!("[LocalBackend] Saved REPL {} ({} bytes)", id, code.len());
        self.notify(ReplListChanged::Saved { id: id.to_string() });
        Ok(())
    }

    async fn archive_repl(&self, id: &str) -> Result<()> {
        tracing::debug!("[LocalBackend] Archive of {} is a delete locally", id);
        self.remove_repl_and_threads(id)?;
        self.notify(ReplListChanged::Archived { id: id.to_string() });
        Ok(())
    }

    async fn unarchive_repl(&self, id: &str) -> Result<()> {
        tracing::debug!("[LocalBackend] Unarchive of {} ignored locally", id);
        Ok(())
    }

    async fn delete_repl(&self, id: &str) -> Result<()> {
        self.remove_repl_and_threads(id)?;
        tracing::debug!("[LocalBackend] Deleted REPL {}", id);
        self.notify(ReplListChanged::Deleted { id: id.to_string() });
        Ok(())
    }

    async fn attach_thread_to_repl(&self, thread_id: &str, repl_id: &str) -> Result<()> {
        if self.config.is_placeholder_thread(thread_id) {
            tracing::debug!("[LocalBackend] Not attaching placeholder thread '{}'", thread_id);
            return Ok(());
        }
        if let Some(existing) = self.read_thread(thread_id)? {
            tracing::debug!(
                "[LocalBackend] Thread {} already on REPL {}",
                thread_id,
                existing.repl_id
            );
            return Ok(());
        }
        self.put_thread(&ThreadAssociation {
            thread_id: thread_id.to_string(),
            repl_id: repl_id.to_string(),
            attached_at: self.clock.tick(),
        })
    }

    async fn get_thread_repl_id(&self, thread_id: &str) -> Result<Option<String>> {
        Ok(self.read_thread(thread_id)?.map(|a| a.repl_id))
    }

    async fn get_thread_for_repl(&self, repl_id: &str) -> Result<Option<String>> {
        Ok(latest_thread_for(&self.all_thread_associations()?, repl_id))
    }

    async fn get_active_repl_id(&self) -> Result<Option<String>> {
        self.read_active_repl_id()
    }

    async fn set_active_repl_id(&self, id: &str) -> Result<()> {
        self.write_active_repl_id(id)
    }

    fn readiness(&self) -> StorageReadiness {
        StorageReadiness {
            is_authenticated: false,
            is_auth_resolved: true,
            is_loaded: true,
        }
    }

    fn subscribe_repl_list(&self) -> broadcast::Receiver<ReplListChanged> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> LocalBackend {
        LocalBackend::in_memory(LoopdeckConfig::default())
    }

    #[tokio::test]
    async fn test_save_preserves_name_and_created_at() {
        let backend = backend();
        backend.save_repl("r1", "a", Some("first")).await.unwrap();
        let before = backend.get_repl("r1").await.unwrap().unwrap();

        backend.save_repl("r1", "b", None).await.unwrap();
        let after = backend.get_repl("r1").await.unwrap().unwrap();

        assert_eq!(after.code, "b");
        assert_eq!(after.name.as_deref(), Some("first"));
        assert_eq!(after.created_at, before.created_at);
        assert!(after.last_updated > before.last_updated);
    }

    #[tokio::test]
    async fn test_listing_is_most_recent_first() {
        let backend = backend();
        backend.save_repl("a", "1", None).await.unwrap();
        backend.save_repl("b", "2", None).await.unwrap();
        backend.save_repl("a", "3", None).await.unwrap();

        let ids: Vec<_> = backend
            .get_all_repls()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_create_repl_generates_uuid() {
        let backend = backend();
        let id = backend.create_repl("code", None).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(backend.get_repl(&id).await.unwrap().unwrap().code, "code");
    }

    #[tokio::test]
    async fn test_archive_is_delete_and_unarchive_is_noop() {
        let backend = backend();
        backend.save_repl("r1", "a", None).await.unwrap();
        backend.attach_thread_to_repl("t1", "r1").await.unwrap();

        backend.archive_repl("r1").await.unwrap();
        backend.unarchive_repl("r1").await.unwrap();

        assert!(backend.get_repl("r1").await.unwrap().is_none());
        assert!(backend.get_thread_repl_id("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attach_is_first_write_wins() {
        let backend = backend();
        backend.attach_thread_to_repl("t1", "r1").await.unwrap();
        backend.attach_thread_to_repl("t1", "r2").await.unwrap();
        assert_eq!(
            backend.get_thread_repl_id("t1").await.unwrap().as_deref(),
            Some("r1")
        );
    }

    #[tokio::test]
    async fn test_placeholder_threads_are_ignored() {
        let backend = backend();
        backend
            .attach_thread_to_repl("__LOCALID_123", "r1")
            .await
            .unwrap();
        backend.attach_thread_to_repl("", "r1").await.unwrap();
        assert!(backend.all_thread_associations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_thread_for_repl_picks_latest() {
        let backend = backend();
        backend.attach_thread_to_repl("t1", "r1").await.unwrap();
        backend.attach_thread_to_repl("t2", "r1").await.unwrap();
        backend.attach_thread_to_repl("t3", "r2").await.unwrap();
        assert_eq!(
            backend.get_thread_for_repl("r1").await.unwrap().as_deref(),
            Some("t2")
        );
        assert!(backend.get_thread_for_repl("r9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_associations() {
        let backend = backend();
        backend.save_repl("r1", "a", None).await.unwrap();
        backend.save_repl("r2", "b", None).await.unwrap();
        backend.attach_thread_to_repl("t1", "r1").await.unwrap();
        backend.attach_thread_to_repl("t2", "r2").await.unwrap();

        backend.delete_repl("r1").await.unwrap();

        assert!(backend.get_thread_repl_id("t1").await.unwrap().is_none());
        assert!(backend.get_thread_repl_id("t2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_active_pointer_and_flags() {
        let backend = backend();
        assert!(backend.get_active_repl_id().await.unwrap().is_none());
        backend.set_active_repl_id("r1").await.unwrap();
        assert_eq!(
            backend.get_active_repl_id().await.unwrap().as_deref(),
            Some("r1")
        );

        assert!(!backend.is_migration_done().unwrap());
        backend.mark_migration_done().unwrap();
        assert!(backend.is_migration_done().unwrap());
    }

    #[tokio::test]
    async fn test_clear_keeps_pointer() {
        let backend = backend();
        backend.save_repl("r1", "a", None).await.unwrap();
        backend.attach_thread_to_repl("t1", "r1").await.unwrap();
        backend.set_active_repl_id("r1").await.unwrap();

        assert_eq!(backend.clear_repls_and_threads().unwrap(), 2);
        assert!(backend.list_all_repls().unwrap().is_empty());
        assert_eq!(backend.read_active_repl_id().unwrap().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_undecodable_record_is_skipped() {
        let store = Arc::new(MemoryKeyStore::new());
        store.set("loopdeck:repl:bad", "{\"code\": 5}").unwrap();
        store.set("loopdeck:repl:ok", "plain code").unwrap();
        let backend = LocalBackend::new(store, LoopdeckConfig::default()).unwrap();

        let repls = backend.list_all_repls().unwrap();
        assert_eq!(repls.len(), 1);
        assert_eq!(repls[0].id, "ok");
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let backend = backend();
        let mut rx = backend.subscribe_repl_list();
        backend.save_repl("r1", "a", None).await.unwrap();
        backend.delete_repl("r1").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ReplListChanged::Saved {
                id: "r1".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            ReplListChanged::Deleted {
                id: "r1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_clock_resumes_after_stored_stamps() {
        let store = Arc::new(MemoryKeyStore::new());
        // Year 2100 in Unix milliseconds.
        let future: i64 = 4_102_444_800_000;
        store
            .set(
                "loopdeck:repl:old",
                &format!(
                    "{{\"version\":\"1.1.0\",\"id\":\"old\",\"code\":\"x\",\"created_at\":{0},\"last_updated\":{0}}}",
                    future
                ),
            )
            .unwrap();
        let backend = LocalBackend::new(store, LoopdeckConfig::default()).unwrap();
        backend.save_repl("new", "y", None).await.unwrap();

        let ids: Vec<_> = backend
            .get_all_repls()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }
}
