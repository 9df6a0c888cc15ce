//! String key/value stores backing the local fallback backend.

use super::atomic_json::AtomicJsonFile;
use loopdeck_core::error::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// A flat string key/value store with the semantics of browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, in lexical order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Removes every key starting with `prefix`; returns how many were removed.
    fn remove_with_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.keys_with_prefix(prefix)?;
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }
}

type Entries = BTreeMap<String, String>;

fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn prefixed(entries: &Entries, prefix: &str) -> Vec<String> {
    entries
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

/// In-memory store. Contents are lost when dropped.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<Entries>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(prefixed(&lock(&self.entries), prefix))
    }
}

/// Store persisted as a single JSON document.
///
/// Reads are served from a cache loaded at open; every write is a locked
/// read-modify-write of the file, after which the cache is replaced with
/// what was written.
pub struct FileKeyStore {
    file: AtomicJsonFile<Entries>,
    cache: Mutex<Entries>,
}

impl FileKeyStore {
    /// Opens (or lazily creates) the store at `path`.
    pub fn open(path: PathBuf) -> Result<Self> {
        let file: AtomicJsonFile<Entries> = AtomicJsonFile::new(path);
        let entries: Entries = file.load()?.unwrap_or_default();
        tracing::debug!(
            "[FileKeyStore] Opened {} with {} keys",
            file.path().display(),
            entries.len()
        );
        Ok(Self {
            file,
            cache: Mutex::new(entries),
        })
    }

    fn write<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Entries),
    {
        let mut written = Entries::new();
        self.file.update(Entries::new(), |entries| {
            f(entries);
            written = entries.clone();
            Ok(())
        })?;
        *lock(&self.cache) = written;
        Ok(())
    }
}

impl KeyValueStore for FileKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.cache).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        if !lock(&self.cache).contains_key(key) {
            return Ok(());
        }
        self.write(|entries| {
            entries.remove(key);
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(prefixed(&lock(&self.cache), prefix))
    }

    fn remove_with_prefix(&self, prefix: &str) -> Result<usize> {
        let mut removed = 0;
        self.write(|entries| {
            let before = entries.len();
            entries.retain(|k, _| !k.starts_with(prefix));
            removed = before - entries.len();
        })?;
        Ok(removed)
    }
}
