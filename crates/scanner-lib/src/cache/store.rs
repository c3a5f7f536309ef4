//! Storage backends for the result cache
//!
//! Stores deal in opaque bytes. A write replaces the previous value in a
//! single step so readers see either the old or the new entry, never a
//! partial one.

use super::CacheKey;
use crate::error::CacheError;
use dashmap::DashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Byte-level persistence for cache entries
pub trait CacheStore: Send + Sync {
    /// Read the stored bytes for a key, `None` if absent
    fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Atomically replace the stored bytes for a key
    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError>;

    /// Remove a key; removing an absent key is not an error
    fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, Arc<Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().to_vec()))
    }

    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        self.entries.insert(key.clone(), Arc::new(bytes.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory
///
/// File names are the key fingerprint, so tenant ids never appear on disk.
/// Writes go to a temp file in the same directory which is then renamed
/// over the target.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Create the store, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry file for a key
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.fingerprint()))
    }
}

impl CacheStore for FileCacheStore {
    fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        match std::fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(key);

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| CacheError::Io(e.error))?;

        debug!(path = %path.display(), bytes = bytes.len(), "Cache entry written");
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceClass;
    use tempfile::TempDir;

    fn key(tenant: &str) -> CacheKey {
        CacheKey::new(tenant, ResourceClass::ComputeInstance)
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCacheStore::new();
        assert!(store.read(&key("a")).unwrap().is_none());

        store.write(&key("a"), b"first").unwrap();
        store.write(&key("a"), b"second").unwrap();
        assert_eq!(store.read(&key("a")).unwrap().unwrap(), b"second");
        assert_eq!(store.len(), 1);

        store.remove(&key("a")).unwrap();
        store.remove(&key("a")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_replaces_and_removes() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(temp_dir.path().join("cache")).unwrap();

        store.write(&key("acme"), b"{\"v\":1}").unwrap();
        store.write(&key("acme"), b"{\"v\":2}").unwrap();
        assert_eq!(store.read(&key("acme")).unwrap().unwrap(), b"{\"v\":2}");

        // Only the entry file remains, no temp files
        let files: Vec<_> = std::fs::read_dir(store.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);

        store.remove(&key("acme")).unwrap();
        assert!(store.read(&key("acme")).unwrap().is_none());
        store.remove(&key("acme")).unwrap();
    }

    #[test]
    fn test_file_names_do_not_leak_tenant_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCacheStore::new(temp_dir.path()).unwrap();

        let path = store.entry_path(&key("secret-tenant"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(!name.contains("secret-tenant"));
        assert_ne!(path, store.entry_path(&key("other-tenant")));
    }
}
