//! Persisted key/value storage surviving across sessions.
//!
//! The client only reads the tenant fallback from here; the session store
//! writes it on login and clears it on logout.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Key under which the tenant id is persisted.
pub const TENANT_ID_KEY: &str = "tenantId";

/// Errors raised by persistent storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// String key/value storage shared between the session store and the
/// request interceptor.
///
/// Reads never fail: a backend that cannot read returns `None`.
pub trait PersistedStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    /// Returns `StorageError` if the value could not be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// # Errors
    /// Returns `StorageError` if the removal could not be persisted.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistedStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// In-memory mirror of the storage file.
type FileState = BTreeMap<String, String>;

/// Storage backed by a JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file at `path`.
    ///
    /// # Errors
    /// Returns `StorageError::Io` if an existing file cannot be read and
    /// `StorageError::Corrupt` if it is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the state, write it to a temporary file
    /// next to the storage file and rename it into place. The in-memory
    /// state only changes once the rename succeeded.
    fn update(&self, change: impl FnOnce(&mut FileState)) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        change(&mut next);

        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        let raw = serde_json::to_vec_pretty(&next).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&raw).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        *state = next;
        Ok(())
    }
}

impl PersistedStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.state.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|state| {
            state.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|state| {
            state.remove(key);
        })
    }
}
