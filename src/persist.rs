//! Key/value persistence handle injected into session components.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Opaque store for small blobs (cached reference data, filter selections,
/// the download ledger).
pub trait PersistenceStore: Send + Sync {
    /// Reads the blob stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be read.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `bytes` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be written.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Removes the blob stored under `key`. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be modified.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Loads and decodes a JSON value.
///
/// # Errors
///
/// Returns an error if the read fails or the stored bytes are not valid JSON
/// for `T`.
pub fn load_json<T: DeserializeOwned>(store: &dyn PersistenceStore, key: &str) -> Result<Option<T>> {
    store
        .read(key)?
        .map(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
        .transpose()
}

/// Encodes and stores a JSON value.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub fn save_json<T: Serialize>(store: &dyn PersistenceStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.write(key, &bytes)
}

/// Stores each key as `<dir>/<key>.json`, written atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl PersistenceStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, used when nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // A poisoned map still holds consistent blobs; keep using it.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl PersistenceStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries().get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_round_trip_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("cache"));

        assert!(store.read("domains").unwrap().is_none());
        store.write("domains", b"[1,2]").unwrap();
        assert_eq!(store.read("domains").unwrap().as_deref(), Some(&b"[1,2]"[..]));
        assert!(!dir.path().join("cache/domains.json.tmp").exists());

        store.remove("domains").unwrap();
        store.remove("domains").unwrap();
        assert!(store.read("domains").unwrap().is_none());
    }

    #[test]
    fn file_store_sanitizes_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.write("../escape/me", b"x").unwrap();
        assert!(dir.path().join("___escape_me.json").exists());
    }

    #[test]
    fn json_helpers_use_store() {
        let store = MemoryStore::new();
        save_json(&store, "numbers", &vec![1u32, 2, 3]).unwrap();
        let loaded: Option<Vec<u32>> = load_json(&store, "numbers").unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        let missing: Option<Vec<u32>> = load_json(&store, "other").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn corrupt_json_is_an_error() {
        let store = MemoryStore::new();
        store.write("numbers", b"not json").unwrap();
        let loaded: Result<Option<Vec<u32>>> = load_json(&store, "numbers");
        assert!(loaded.is_err());
    }
}
