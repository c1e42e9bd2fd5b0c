//! Cache storage.
//!
//! The engine addresses namespaces by identifier only and never holds a
//! handle across requests. Backends serialize writes to the same key with
//! last-write-wins.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;

use super::error::StorageError;
use super::lock::{rw_read, rw_write};
use super::request::{EntryKey, ResponseSnapshot};

const SOURCE: &str = "engine::store";

/// Durable storage of namespaced response snapshots.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open `namespace`, creating it if absent.
    async fn open(&self, namespace: &str) -> Result<(), StorageError>;

    /// Look up the entry stored under `key`, if any.
    async fn lookup(
        &self,
        namespace: &str,
        key: &EntryKey,
    ) -> Result<Option<ResponseSnapshot>, StorageError>;

    /// Store `snapshot` under `key`, creating the namespace if absent and
    /// overwriting any previous entry.
    async fn put(
        &self,
        namespace: &str,
        key: EntryKey,
        snapshot: ResponseSnapshot,
    ) -> Result<(), StorageError>;

    /// Every namespace identifier currently present.
    async fn namespaces(&self) -> Result<Vec<String>, StorageError>;

    /// Delete a whole namespace. Returns false if it did not exist.
    async fn delete(&self, namespace: &str) -> Result<bool, StorageError>;

    /// Keys stored in `namespace`; empty if it does not exist.
    async fn keys(&self, namespace: &str) -> Result<Vec<EntryKey>, StorageError>;
}

/// In-process storage, optionally capped per namespace.
///
/// A full namespace rejects new keys with `QuotaExceeded`; overwriting an
/// existing key always succeeds.
pub struct MemoryStorage {
    namespaces: RwLock<BTreeMap<String, HashMap<EntryKey, ResponseSnapshot>>>,
    max_entries: Option<NonZeroUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(BTreeMap::new()),
            max_entries: None,
        }
    }

    pub fn with_max_entries(max_entries: NonZeroUsize) -> Self {
        Self {
            namespaces: RwLock::new(BTreeMap::new()),
            max_entries: Some(max_entries),
        }
    }

    /// Number of entries in `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        rw_read(&self.namespaces, SOURCE, "len")
            .get(namespace)
            .map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, namespace: &str) -> Result<(), StorageError> {
        rw_write(&self.namespaces, SOURCE, "open")
            .entry(namespace.to_string())
            .or_default();
        Ok(())
    }

    async fn lookup(
        &self,
        namespace: &str,
        key: &EntryKey,
    ) -> Result<Option<ResponseSnapshot>, StorageError> {
        Ok(rw_read(&self.namespaces, SOURCE, "lookup")
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        namespace: &str,
        key: EntryKey,
        snapshot: ResponseSnapshot,
    ) -> Result<(), StorageError> {
        let mut guard = rw_write(&self.namespaces, SOURCE, "put");
        let entries = guard.entry(namespace.to_string()).or_default();

        let full = self
            .max_entries
            .is_some_and(|limit| entries.len() >= limit.get());
        if full && !entries.contains_key(&key) {
            return Err(StorageError::QuotaExceeded {
                namespace: namespace.to_string(),
            });
        }

        entries.insert(key, snapshot);
        Ok(())
    }

    async fn namespaces(&self) -> Result<Vec<String>, StorageError> {
        Ok(rw_read(&self.namespaces, SOURCE, "namespaces")
            .keys()
            .cloned()
            .collect())
    }

    async fn delete(&self, namespace: &str) -> Result<bool, StorageError> {
        Ok(rw_write(&self.namespaces, SOURCE, "delete")
            .remove(namespace)
            .is_some())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<EntryKey>, StorageError> {
        Ok(rw_read(&self.namespaces, SOURCE, "keys")
            .get(namespace)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
