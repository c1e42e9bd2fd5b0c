//! Filesystem-backed cache storage.
//!
//! Layout: one directory per namespace under the root, one JSON document per
//! entry named after the SHA-256 of its key. Writes land in a temporary file
//! first and are renamed into place, so readers never see a partial entry and
//! concurrent writes to one key resolve last-write-wins. With an entry cap,
//! writes to one namespace are serialized so the cap holds under
//! concurrency within this process.

use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::engine::{CacheStorage, EntryKey, Method, ResponseSnapshot, StorageError};

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    method: String,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64 of the response body.
    body: String,
}

impl StoredEntry {
    fn new(key: &EntryKey, snapshot: &ResponseSnapshot) -> Self {
        Self {
            method: key.method.as_str().to_string(),
            url: key.url.clone(),
            status: snapshot.status,
            headers: snapshot.headers.clone(),
            body: STANDARD.encode(&snapshot.body),
        }
    }

    fn key(&self) -> EntryKey {
        EntryKey {
            method: Method::parse(&self.method),
            url: self.url.clone(),
        }
    }

    fn into_snapshot(self) -> Result<ResponseSnapshot, StorageError> {
        let body = STANDARD
            .decode(self.body.as_bytes())
            .map_err(|err| StorageError::Encoding(format!("invalid body encoding: {err}")))?;
        Ok(ResponseSnapshot::new(self.status, self.headers, body))
    }
}

#[derive(Debug)]
pub struct FsCacheStorage {
    root: PathBuf,
    max_entries: Option<NonZeroUsize>,
    /// Held across the quota check and the rename.
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FsCacheStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf, max_entries: Option<NonZeroUsize>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_entries,
            write_locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, StorageError> {
        let valid = !namespace.is_empty()
            && namespace != "."
            && namespace != ".."
            && !namespace.starts_with('.')
            && !namespace.contains(['/', '\\']);
        if !valid {
            return Err(StorageError::InvalidNamespace(namespace.to_string()));
        }
        Ok(self.root.join(namespace))
    }

    fn write_lock(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    fn entry_path(dir: &Path, key: &EntryKey) -> PathBuf {
        let digest = Sha256::digest(format!("{} {}", key.method, key.url).as_bytes());
        dir.join(format!("{}.{ENTRY_EXTENSION}", hex::encode(digest)))
    }

    async fn entry_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>, StorageError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StorageError::Encoding(format!("{}: {err}", path.display())))
    }
}

#[async_trait]
impl CacheStorage for FsCacheStorage {
    async fn open(&self, namespace: &str) -> Result<(), StorageError> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(dir).await?;
        Ok(())
    }

    async fn lookup(
        &self,
        namespace: &str,
        key: &EntryKey,
    ) -> Result<Option<ResponseSnapshot>, StorageError> {
        let dir = self.namespace_dir(namespace)?;
        match Self::read_entry(&Self::entry_path(&dir, key)).await? {
            Some(entry) => entry.into_snapshot().map(Some),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        namespace: &str,
        key: EntryKey,
        snapshot: ResponseSnapshot,
    ) -> Result<(), StorageError> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir).await?;
        let target = Self::entry_path(&dir, &key);

        let lock = self.max_entries.map(|_| self.write_lock(namespace));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        if let Some(limit) = self.max_entries {
            let exists = fs::try_exists(&target).await?;
            if !exists && Self::entry_files(&dir).await?.len() >= limit.get() {
                return Err(StorageError::QuotaExceeded {
                    namespace: namespace.to_string(),
                });
            }
        }

        let document = serde_json::to_vec(&StoredEntry::new(&key, &snapshot))
            .map_err(|err| StorageError::Encoding(err.to_string()))?;

        let temp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp).await?;
        let written = async {
            file.write_all(&document).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(err) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn namespaces(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut namespaces = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => namespaces.push(name),
                Ok(_) => {}
                Err(name) => warn!(name = ?name, "skipping non UTF-8 namespace directory"),
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    async fn delete(&self, namespace: &str) -> Result<bool, StorageError> {
        let dir = self.namespace_dir(namespace)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<EntryKey>, StorageError> {
        let dir = self.namespace_dir(namespace)?;
        let mut keys = Vec::new();
        for path in Self::entry_files(&dir).await? {
            if let Some(entry) = Self::read_entry(&path).await? {
                keys.push(entry.key());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_names_cannot_escape_the_root() {
        let storage = FsCacheStorage {
            root: PathBuf::from("/tmp/waystation-test"),
            max_entries: None,
            write_locks: DashMap::new(),
        };
        for bad in ["", "..", "../etc", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(
                    storage.namespace_dir(bad),
                    Err(StorageError::InvalidNamespace(_))
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(storage.namespace_dir("static-v1").is_ok());
    }

    #[test]
    fn entry_names_are_stable_per_key() {
        let dir = Path::new("/cache/static-v1");
        let url = url::Url::parse("https://app.example.com/index.html").unwrap();
        let first = FsCacheStorage::entry_path(dir, &EntryKey::get(&url));
        let second = FsCacheStorage::entry_path(dir, &EntryKey::get(&url));
        let head = FsCacheStorage::entry_path(dir, &EntryKey::new(Method::Head, &url));
        assert_eq!(first, second);
        assert_ne!(first, head);
        assert_eq!(first.extension().and_then(|e| e.to_str()), Some("json"));
    }
}
