use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::StorageError;

/// String key/value storage that survives between sessions.
pub trait KvStorage: Send {
    /// Returns the stored value for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    /// Stores `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Storage kept in a single JSON object file, one string value per key.
#[derive(Clone, Debug)]
pub struct FileKvStorage {
    path: PathBuf,
}

impl FileKvStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| self.io_error(source))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&content) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                // Unreadable file starts over empty; the next `set` rewrites it.
                warn!(path = %self.path.display(), error = %err, "ignoring corrupt storage file");
                Ok(BTreeMap::new())
            }
        }
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl KvStorage for FileKvStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        let content = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, content).map_err(|source| self.io_error(source))
    }
}

/// In-process storage, mostly for tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryKvStorage {
    entries: BTreeMap<String, String>,
}

impl MemoryKvStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage pre-populated with one entry.
    pub fn with_entry(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut storage = Self::default();
        storage.entries.insert(key.into(), value.into());
        storage
    }
}

impl KvStorage for MemoryKvStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
