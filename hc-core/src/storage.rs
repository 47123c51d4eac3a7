//! Durable key/value storage for key material.
//!
//! The Key Manager persists three base64 strings under fixed keys (see
//! `constants::storage_keys`). `FileKeyStore` keeps them in a JSON map on
//! disk so they survive restarts; `MemoryKeyStore` is for tests and
//! ephemeral sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{HcError, HcResult};

/// String key/value storage.
pub trait KeyStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> HcResult<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> HcResult<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> HcResult<()>;
}

/// In-memory `KeyStore`.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> HcResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| HcError::Storage("memory store poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> HcResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| HcError::Storage("memory store poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> HcResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| HcError::Storage("memory store poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }
}

/// File-backed `KeyStore` holding a JSON object of strings.
///
/// The whole map is rewritten on every change. A missing file reads as
/// an empty store.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyStore {
    /// Open (or lazily create) a store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> HcResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| HcError::Storage(format!("corrupt key store {}: {e}", self.path.display())))
    }

    /// Read the map for a write. A corrupt file reads as empty so the
    /// write replaces it.
    fn read_map_for_write(&self) -> HcResult<(BTreeMap<String, String>, bool)> {
        match self.read_map() {
            Ok(map) => Ok((map, false)),
            Err(HcError::Storage(reason)) => {
                warn!(category = "keys", %reason, "discarding unreadable key store");
                Ok((BTreeMap::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> HcResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, contents)?;
        debug!("key store written: {} entries", map.len());
        Ok(())
    }

    fn guard(&self) -> HcResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| HcError::Storage("file store lock poisoned".into()))
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self, key: &str) -> HcResult<Option<String>> {
        let _guard = self.guard()?;
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> HcResult<()> {
        let _guard = self.guard()?;
        let (mut map, _) = self.read_map_for_write()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> HcResult<()> {
        let _guard = self.guard()?;
        let (mut map, corrupt) = self.read_map_for_write()?;
        if map.remove(key).is_some() || corrupt {
            self.write_map(&map)?;
        }
        Ok(())
    }
}
