//! Client-side persistence of UI state.
//!
//! [`Storage`] is the raw key/value backend and is allowed to fail (quota,
//! disabled storage, unwritable file). [`PersistentState`] sits on top of it,
//! namespaces every key as `<namespace>_<host>_<key>`, and degrades every
//! failure to "treat as empty" with a warning. Callers never see a storage
//! error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable")]
    Unavailable,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt storage file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Raw string key/value backend.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ============================================================================
// MemoryStorage
// ============================================================================

/// In-memory backend. Can be switched off to simulate disabled storage.
#[derive(Default)]
pub struct MemoryStorage {
    map: Mutex<HashMap<String, String>>,
    disabled: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend where every call fails.
    pub fn disabled() -> Self {
        let s = Self::default();
        s.disabled.store(true, Ordering::Relaxed);
        s
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.map.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.disabled.load(Ordering::Relaxed) {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.map.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.map.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// FileStorage
// ============================================================================

/// One JSON object file holding every key.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    /// `<data_local_dir>/weavy/state.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|p| p.join("weavy").join("state.json"))
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(HashMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, map: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(map)?)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value.to_string());
        self.write_all(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(&map)?;
        }
        Ok(())
    }
}

// ============================================================================
// PersistentState
// ============================================================================

/// Namespaced, infallible typed view over a [`Storage`].
#[derive(Clone)]
pub struct PersistentState {
    storage: Arc<dyn Storage>,
    prefix: String,
}

impl PersistentState {
    pub fn new(storage: Arc<dyn Storage>, namespace: &str, host: &str) -> Self {
        Self { storage, prefix: format!("{namespace}_{host}") }
    }

    /// The full backend key for `key`.
    pub fn key(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key)
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full = self.key(key);
        let raw = match self.storage.get(&full) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("could not read {full}: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("discarding unreadable value for {full}: {e}");
                None
            }
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) {
        let full = self.key(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("could not serialize {full}: {e}");
                return;
            }
        };
        if let Err(e) = self.storage.set(&full, &raw) {
            warn!("could not write {full}: {e}");
        }
    }

    pub fn clear(&self, key: &str) {
        let full = self.key(key);
        if let Err(e) = self.storage.remove(&full) {
            warn!("could not remove {full}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_keys() {
        let mem = Arc::new(MemoryStorage::new());
        let state = PersistentState::new(mem.clone(), "weavy", "acme.weavy.io");
        state.save("open-panel", &"bubble-4");
        assert_eq!(mem.keys(), vec!["weavy_acme.weavy.io_open-panel".to_string()]);
        assert_eq!(state.load::<String>("open-panel").as_deref(), Some("bubble-4"));
    }

    #[test]
    fn test_disabled_storage_degrades_to_empty() {
        let state = PersistentState::new(Arc::new(MemoryStorage::disabled()), "weavy", "h");
        state.save("dock-position", &(10, 20));
        assert_eq!(state.load::<(i32, i32)>("dock-position"), None);
        state.clear("dock-position");
    }

    #[test]
    fn test_garbage_value_is_empty() {
        let mem = Arc::new(MemoryStorage::new());
        mem.set("weavy_h_scroll-1", "{not json").unwrap();
        let state = PersistentState::new(mem, "weavy", "h");
        assert_eq!(state.load::<f64>("scroll-1"), None);
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested").join("state.json"));
        assert_eq!(storage.get("a").unwrap(), None);
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_corrupt_file_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "[[[").unwrap();
        let state = PersistentState::new(Arc::new(FileStorage::new(path)), "weavy", "h");
        assert_eq!(state.load::<String>("open-panel"), None);
    }
}
