//! Synced REPL storage over the account graph.
//!
//! Reads are served from an in-memory cache filled by `sync()`. Writes update
//! the cache, then push to the account graph; when a push fails the record is
//! written to the local backend instead and remembered as pending. Pending
//! records are re-pushed after the next successful write.
//!
//! The pending set is journaled in the local store, so a later `sync()`
//! restores fallback records into the cache and pushes them again.

use crate::local_backend::{LocalBackend, latest_thread_for, next_record};
use async_trait::async_trait;
use loopdeck_core::error::{LoopdeckError, Result};
use loopdeck_core::repl::{
    AuthState, LogicalClock, Repl, ReplListChanged, ReplStorage, ReplSummary, StorageReadiness,
    ThreadAssociation, sort_by_recency,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

/// Transport to the per-user account graph.
///
/// All operations are keyed by the authenticated user id.
#[async_trait]
pub trait AccountGraph: Send + Sync {
    async fn load_repls(&self, user_id: &str) -> Result<Vec<Repl>>;

    /// Upserts a full record, timestamps included.
    async fn put_repl(&self, user_id: &str, repl: &Repl) -> Result<()>;

    async fn remove_repl(&self, user_id: &str, id: &str) -> Result<()>;

    async fn load_threads(&self, user_id: &str) -> Result<Vec<ThreadAssociation>>;

    async fn put_thread(&self, user_id: &str, assoc: &ThreadAssociation) -> Result<()>;

    async fn remove_thread(&self, user_id: &str, thread_id: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
struct Profile {
    repls: HashMap<String, Repl>,
    threads: HashMap<String, ThreadAssociation>,
}

/// Account graph held in process memory.
///
/// Writes can be made to fail on demand to exercise the fallback path.
#[derive(Debug, Default)]
pub struct InMemoryAccountGraph {
    profiles: Mutex<HashMap<String, Profile>>,
    fail_writes: AtomicBool,
    /// Writes left before every further write fails.
    write_budget: Mutex<Option<usize>>,
}

impl InMemoryAccountGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
        if !fail {
            *self.write_budget.lock().unwrap_or_else(|p| p.into_inner()) = None;
        }
    }

    /// Lets `writes` more writes succeed, then fails the rest until
    /// `set_fail_writes(false)`.
    pub fn fail_writes_after(&self, writes: usize) {
        *self.write_budget.lock().unwrap_or_else(|p| p.into_inner()) = Some(writes);
    }

    /// Number of REPLs stored for `user_id`, archived included.
    pub fn repl_count(&self, user_id: &str) -> usize {
        self.profiles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(user_id)
            .map(|p| p.repls.len())
            .unwrap_or(0)
    }

    fn write<F>(&self, user_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Profile),
    {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LoopdeckError::storage("account graph unavailable"));
        }
        if let Some(left) = self
            .write_budget
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_mut()
        {
            if *left == 0 {
                return Err(LoopdeckError::storage("account graph unavailable"));
            }
            *left -= 1;
        }
        let mut profiles = self.profiles.lock().unwrap_or_else(|p| p.into_inner());
        f(profiles.entry(user_id.to_string()).or_default());
        Ok(())
    }

    fn read(&self, user_id: &str) -> Profile {
        self.profiles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AccountGraph for InMemoryAccountGraph {
    async fn load_repls(&self, user_id: &str) -> Result<Vec<Repl>> {
        Ok(self.read(user_id).repls.into_values().collect())
    }

    async fn put_repl(&self, user_id: &str, repl: &Repl) -> Result<()> {
        self.write(user_id, |p| {
            p.repls.insert(repl.id.clone(), repl.clone());
        })
    }

    async fn remove_repl(&self, user_id: &str, id: &str) -> Result<()> {
        self.write(user_id, |p| {
            p.repls.remove(id);
        })
    }

    async fn load_threads(&self, user_id: &str) -> Result<Vec<ThreadAssociation>> {
        Ok(self.read(user_id).threads.into_values().collect())
    }

    async fn put_thread(&self, user_id: &str, assoc: &ThreadAssociation) -> Result<()> {
        self.write(user_id, |p| {
            p.threads.insert(assoc.thread_id.clone(), assoc.clone());
        })
    }

    async fn remove_thread(&self, user_id: &str, thread_id: &str) -> Result<()> {
        self.write(user_id, |p| {
            p.threads.remove(thread_id);
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
enum PendingWrite {
    Repl(String),
    RemoveRepl(String),
    Thread(String),
}

#[derive(Default)]
struct Cache {
    repls: HashMap<String, Repl>,
    threads: HashMap<String, ThreadAssociation>,
}

pub struct SyncedBackend {
    graph: Arc<dyn AccountGraph>,
    local: Arc<LocalBackend>,
    auth: AuthState,
    user_id: String,
    clock: LogicalClock,
    cache: RwLock<Cache>,
    loaded: AtomicBool,
    pending: Mutex<BTreeSet<PendingWrite>>,
    changes: broadcast::Sender<ReplListChanged>,
}

impl SyncedBackend {
    /// Creates a backend for the signed-in user in `auth`.
    ///
    /// # Errors
    ///
    /// Returns `LoopdeckError::Storage` if `auth` carries no user id.
    pub fn new(
        graph: Arc<dyn AccountGraph>,
        local: Arc<LocalBackend>,
        auth: AuthState,
    ) -> Result<Self> {
        let user_id = auth
            .user_id
            .clone()
            .filter(|_| auth.is_authenticated)
            .ok_or_else(|| LoopdeckError::storage("synced storage requires a signed-in user"))?;
        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            graph,
            local,
            auth,
            user_id,
            clock: LogicalClock::new(),
            cache: RwLock::new(Cache::default()),
            loaded: AtomicBool::new(false),
            pending: Mutex::new(BTreeSet::new()),
            changes,
        })
    }

    pub fn local(&self) -> &Arc<LocalBackend> {
        &self.local
    }

    /// Loads the user's records from the account graph and marks the backend loaded.
    pub async fn sync(&self) -> Result<()> {
        let repls = self.graph.load_repls(&self.user_id).await?;
        let threads = self.graph.load_threads(&self.user_id).await?;
        tracing::info!(
            "[SyncedBackend] Loaded {} REPLs and {} threads",
            repls.len(),
            threads.len()
        );

        {
            let mut cache = self.cache_write();
            for repl in repls {
                self.clock.observe(repl.last_updated);
                cache.repls.insert(repl.id.clone(), repl);
            }
            for assoc in threads {
                self.clock.observe(assoc.attached_at);
                cache.threads.insert(assoc.thread_id.clone(), assoc);
            }
        }

        let journal = self.read_journal();
        if !journal.is_empty() {
            tracing::info!(
                "[SyncedBackend] Restoring {} fallback writes from the local store",
                journal.len()
            );
            for write in &journal {
                self.restore_fallback(write)?;
            }
            self.pending_lock().extend(journal);
        }

        self.loaded.store(true, Ordering::SeqCst);
        self.notify(ReplListChanged::Reloaded);
        if self.pending_count() > 0 {
            self.flush_pending().await;
        }
        Ok(())
    }

    /// Applies a journaled fallback write to the freshly loaded cache. A local
    /// REPL record only wins over a remote one that is older.
    fn restore_fallback(&self, write: &PendingWrite) -> Result<()> {
        match write {
            PendingWrite::Repl(id) => {
                let Some(repl) = self.local.read_repl(id)? else {
                    return Ok(());
                };
                self.clock.observe(repl.last_updated);
                let mut cache = self.cache_write();
                let newer = cache
                    .repls
                    .get(id)
                    .is_none_or(|remote| remote.last_updated < repl.last_updated);
                if newer {
                    cache.repls.insert(id.clone(), repl);
                }
            }
            PendingWrite::RemoveRepl(id) => {
                self.cache_write().repls.remove(id);
            }
            PendingWrite::Thread(thread_id) => match self.local.read_thread(thread_id)? {
                Some(assoc) => {
                    self.clock.observe(assoc.attached_at);
                    self.cache_write()
                        .threads
                        .entry(thread_id.clone())
                        .or_insert(assoc);
                }
                None => {
                    self.cache_write().threads.remove(thread_id);
                }
            },
        }
        Ok(())
    }

    fn read_journal(&self) -> Vec<PendingWrite> {
        let raw = match self.local.read_sync_pending(&self.user_id) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!("[SyncedBackend] Failed to read pending journal: {}", e);
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!("[SyncedBackend] Discarding unreadable pending journal: {}", e);
            Vec::new()
        })
    }

    /// Mirrors the pending set into the local store.
    fn write_journal(&self) {
        let queued: Vec<PendingWrite> = self.pending_lock().iter().cloned().collect();
        let result = if queued.is_empty() {
            self.local.write_sync_pending(&self.user_id, None)
        } else {
            serde_json::to_string(&queued)
                .map_err(LoopdeckError::from)
                .and_then(|raw| self.local.write_sync_pending(&self.user_id, Some(&raw)))
        };
        if let Err(e) = result {
            tracing::warn!("[SyncedBackend] Failed to journal pending writes: {}", e);
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// True if the account holds any REPL, archived ones included.
    pub fn has_any_repl(&self) -> bool {
        !self.cache_read().repls.is_empty()
    }

    /// True if the account holds the REPL `id`, archived or not.
    pub fn has_repl(&self, id: &str) -> bool {
        self.cache_read().repls.contains_key(id)
    }

    /// Number of writes waiting to be re-pushed.
    pub fn pending_count(&self) -> usize {
        self.pending_lock().len()
    }

    /// Pushes a full record without falling back on failure.
    ///
    /// The cache is only updated once the account graph accepted the write.
    pub async fn try_put_repl(&self, repl: &Repl) -> Result<()> {
        self.graph.put_repl(&self.user_id, repl).await?;
        self.clock.observe(repl.last_updated);
        self.cache_write()
            .repls
            .insert(repl.id.clone(), repl.clone());
        self.notify(ReplListChanged::Saved {
            id: repl.id.clone(),
        });
        Ok(())
    }

    /// Pushes an association without falling back on failure.
    ///
    /// Returns `Ok(false)` when the thread is already associated.
    pub async fn try_put_thread(&self, assoc: &ThreadAssociation) -> Result<bool> {
        if self.cache_read().threads.contains_key(&assoc.thread_id) {
            return Ok(false);
        }
        self.graph.put_thread(&self.user_id, assoc).await?;
        self.clock.observe(assoc.attached_at);
        self.cache_write()
            .threads
            .insert(assoc.thread_id.clone(), assoc.clone());
        Ok(true)
    }

    /// Re-pushes pending writes. Stops at the first failure and returns how
    /// many were flushed.
    pub async fn flush_pending(&self) -> usize {
        let queued: Vec<PendingWrite> = self.pending_lock().iter().cloned().collect();
        let mut flushed = 0;
        for write in queued {
            if let Err(e) = self.push(&write).await {
                tracing::debug!("[SyncedBackend] Reconcile paused: {}", e);
                break;
            }
            self.pending_lock().remove(&write);
            flushed += 1;
        }
        if flushed > 0 {
            self.write_journal();
            tracing::info!("[SyncedBackend] Reconciled {} fallback writes", flushed);
        }
        flushed
    }

    async fn push(&self, write: &PendingWrite) -> Result<()> {
        match write {
            PendingWrite::Repl(id) => {
                let record = self.cache_read().repls.get(id).cloned();
                match record {
                    Some(repl) => self.graph.put_repl(&self.user_id, &repl).await,
                    None => Ok(()),
                }
            }
            PendingWrite::RemoveRepl(id) => self.graph.remove_repl(&self.user_id, id).await,
            PendingWrite::Thread(thread_id) => {
                let assoc = self.cache_read().threads.get(thread_id).cloned();
                match assoc {
                    Some(assoc) => self.graph.put_thread(&self.user_id, &assoc).await,
                    None => self.graph.remove_thread(&self.user_id, thread_id).await,
                }
            }
        }
    }

    /// Pushes `write`; on failure records it locally and queues it.
    async fn push_or_fallback(&self, write: PendingWrite) {
        match self.push(&write).await {
            Ok(()) => {
                if self.pending_count() > 0 {
                    self.flush_pending().await;
                }
            }
            Err(e) => {
                tracing::warn!(
                    "[SyncedBackend] Write {:?} failed, using local store: {}",
                    write,
                    e
                );
                if let Err(local_err) = self.write_local(&write).await {
                    tracing::error!("[SyncedBackend] Local fallback failed: {}", local_err);
                }
                self.pending_lock().insert(write);
                self.write_journal();
            }
        }
    }

    async fn write_local(&self, write: &PendingWrite) -> Result<()> {
        match write {
            PendingWrite::Repl(id) => {
                let record = self.cache_read().repls.get(id).cloned();
                match record {
                    Some(repl) => self.local.put_repl(&repl),
                    None => Ok(()),
                }
            }
            PendingWrite::RemoveRepl(id) => self.local.delete_repl(id).await,
            PendingWrite::Thread(thread_id) => {
                let assoc = self.cache_read().threads.get(thread_id).cloned();
                match assoc {
                    Some(assoc) => self.local.put_thread(&assoc),
                    None => Ok(()),
                }
            }
        }
    }

    fn lookup(&self, id: &str) -> Result<Option<Repl>> {
        if let Some(repl) = self.cache_read().repls.get(id) {
            return Ok(Some(repl.clone()));
        }
        self.local.read_repl(id)
    }

    async fn set_archived(&self, id: &str, archived: bool) -> Result<()> {
        let Some(mut repl) = self.lookup(id)? else {
            tracing::debug!("[SyncedBackend] No REPL {} to (un)archive", id);
            return Ok(());
        };
        if repl.archived == archived {
            return Ok(());
        }
        repl.archived = archived;
        self.cache_write().repls.insert(id.to_string(), repl);
        self.push_or_fallback(PendingWrite::Repl(id.to_string()))
            .await;

        let event = if archived {
            ReplListChanged::Archived { id: id.to_string() }
        } else {
            ReplListChanged::Unarchived { id: id.to_string() }
        };
        self.notify(event);
        Ok(())
    }

    fn notify(&self, event: ReplListChanged) {
        let _ = self.changes.send(event);
    }

    fn cache_read(&self) -> std::sync::RwLockReadGuard<'_, Cache> {
        self.cache.read().unwrap_or_else(|p| p.into_inner())
    }

    fn cache_write(&self) -> std::sync::RwLockWriteGuard<'_, Cache> {
        self.cache.write().unwrap_or_else(|p| p.into_inner())
    }

    fn pending_lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<PendingWrite>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ReplStorage for SyncedBackend {
    async fn get_repl(&self, id: &str) -> Result<Option<Repl>> {
        self.lookup(id)
    }

    async fn get_all_repls(&self) -> Result<Vec<ReplSummary>> {
        let mut summaries: Vec<ReplSummary> = self
            .cache_read()
            .repls
            .values()
            .filter(|r| !r.archived)
            .map(Repl::summary)
            .collect();
        sort_by_recency(&mut summaries);
        Ok(summaries)
    }

    async fn save_repl(&self, id: &str, code: &str, name: Option<&str>) -> Result<()> {
        let existing = self.lookup(id)?;
        let record = next_record(&self.clock, existing, id, code, name);
        self.cache_write().repls.insert(id.to_string(), record);
        self.push_or_fallback(PendingWrite::Repl(id.to_string()))
            .await;
        tracing::debug!("[SyncedBackend] Saved REPL {} ({} bytes)", id, code.len());
        self.notify(ReplListChanged::Saved { id: id.to_string() });
        Ok(())
    }

    async fn archive_repl(&self, id: &str) -> Result<()> {
        self.set_archived(id, true).await
    }

    async fn unarchive_repl(&self, id: &str) -> Result<()> {
        self.set_archived(id, false).await
    }

    async fn delete_repl(&self, id: &str) -> Result<()> {
        let orphaned: Vec<String> = {
            let mut cache = self.cache_write();
            cache.repls.remove(id);
            let orphaned: Vec<String> = cache
                .threads
                .values()
                .filter(|a| a.repl_id == id)
                .map(|a| a.thread_id.clone())
                .collect();
            for thread_id in &orphaned {
                cache.threads.remove(thread_id);
            }
            orphaned
        };

        self.push_or_fallback(PendingWrite::RemoveRepl(id.to_string()))
            .await;
        for thread_id in orphaned {
            self.push_or_fallback(PendingWrite::Thread(thread_id)).await;
        }

        tracing::debug!("[SyncedBackend] Deleted REPL {}", id);
        self.notify(ReplListChanged::Deleted { id: id.to_string() });
        Ok(())
    }

    async fn attach_thread_to_repl(&self, thread_id: &str, repl_id: &str) -> Result<()> {
        if self.local.config().is_placeholder_thread(thread_id) {
            tracing::debug!("[SyncedBackend] Not attaching placeholder thread '{}'", thread_id);
            return Ok(());
        }
        {
            let mut cache = self.cache_write();
            if let Some(existing) = cache.threads.get(thread_id) {
                tracing::debug!(
                    "[SyncedBackend] Thread {} already on REPL {}",
                    thread_id,
                    existing.repl_id
                );
                return Ok(());
            }
            cache.threads.insert(
                thread_id.to_string(),
                ThreadAssociation {
                    thread_id: thread_id.to_string(),
                    repl_id: repl_id.to_string(),
                    attached_at: self.clock.tick(),
                },
            );
        }
        self.push_or_fallback(PendingWrite::Thread(thread_id.to_string()))
            .await;
        Ok(())
    }

    async fn get_thread_repl_id(&self, thread_id: &str) -> Result<Option<String>> {
        Ok(self
            .cache_read()
            .threads
            .get(thread_id)
            .map(|a| a.repl_id.clone()))
    }

    async fn get_thread_for_repl(&self, repl_id: &str) -> Result<Option<String>> {
        Ok(latest_thread_for(self.cache_read().threads.values(), repl_id))
    }

    async fn get_active_repl_id(&self) -> Result<Option<String>> {
        self.local.read_active_repl_id()
    }

    async fn set_active_repl_id(&self, id: &str) -> Result<()> {
        self.local.write_active_repl_id(id)
    }

    fn readiness(&self) -> StorageReadiness {
        StorageReadiness {
            is_authenticated: self.auth.is_authenticated,
            is_auth_resolved: self.auth.is_auth_resolved,
            is_loaded: self.is_loaded(),
        }
    }

    fn subscribe_repl_list(&self) -> broadcast::Receiver<ReplListChanged> {
        self.changes.subscribe()
    }
}
