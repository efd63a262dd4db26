//! Storage abstraction for identity data
//!
//! Small key/value interface with an in-memory backend (tests, degraded mode)
//! and a directory-of-JSON-files backend for the CLI.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::errors::StorageError;

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Key-value storage for identity and trust records
pub trait Storage: Send + Sync {
    /// Store data under a key, replacing any previous value
    fn store(&mut self, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Retrieve data by key
    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete data by key
    fn delete(&mut self, key: &str) -> Result<(), StorageError>;

    /// Check if storage is available and accessible
    fn is_available(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Memory Storage
// ----------------------------------------------------------------------------

/// In-memory storage
///
/// Clones share the same underlying map, so a test can keep a clone and
/// inspect what the engine persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    unavailable: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that fails every operation
    pub fn unavailable() -> Self {
        Self {
            entries: Arc::default(),
            unavailable: true,
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StorageError> {
        if self.unavailable {
            return Err(StorageError::Unavailable {
                reason: "memory storage disabled".to_string(),
            });
        }
        self.entries.lock().map_err(|_| StorageError::Unavailable {
            reason: "memory storage lock poisoned".to_string(),
        })
    }
}

impl Storage for MemoryStorage {
    fn store(&mut self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.entries()?.insert(key.to_string(), data);
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }
}

// ----------------------------------------------------------------------------
// File Storage
// ----------------------------------------------------------------------------

/// One `<key>.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn store(&mut self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.root)?;
        // Atomic replace via rename
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_available(&self) -> bool {
        std::fs::create_dir_all(&self.root).is_ok()
    }
}

// ----------------------------------------------------------------------------
// Storage Factory Functions
// ----------------------------------------------------------------------------

/// Create storage for testing
pub fn create_test_storage() -> Box<dyn Storage> {
    Box::new(MemoryStorage::new())
}
