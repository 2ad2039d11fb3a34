//! Persisted local store implementations.
//!
//! [`MemoryStore`] keeps items in process memory. [`FileStore`] mirrors its
//! items into a single JSON object on disk, rewritten on every mutation.

use roster_core::{RosterResult, StoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

use crate::traits::LocalStore;

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryStore {
    fn get_item(&self, key: &str) -> RosterResult<Option<String>> {
        let items = self.items.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> RosterResult<()> {
        let mut items = self.items.write().map_err(|_| StoreError::LockPoisoned)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> RosterResult<()> {
        let mut items = self.items.write().map_err(|_| StoreError::LockPoisoned)?;
        items.remove(key);
        Ok(())
    }
}

/// Store persisted as one JSON object file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    items: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// An unreadable or malformed file is logged and replaced by an empty
    /// store on the next write.
    pub fn open(path: impl AsRef<Path>) -> RosterResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let items = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
            match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(items) => items,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Discarding malformed store file");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            items: RwLock::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> RosterResult<()> {
        let contents = serde_json::to_string_pretty(items).map_err(|e| StoreError::Serialization {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(&self.path, contents).map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn get_item(&self, key: &str) -> RosterResult<Option<String>> {
        let items = self.items.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> RosterResult<()> {
        let mut items = self.items.write().map_err(|_| StoreError::LockPoisoned)?;
        items.insert(key.to_string(), value.to_string());
        self.flush(&items)
    }

    fn remove_item(&self, key: &str) -> RosterResult<()> {
        let mut items = self.items.write().map_err(|_| StoreError::LockPoisoned)?;
        if items.remove(key).is_some() {
            self.flush(&items)?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}
