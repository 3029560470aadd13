//! Storage contract and backend factory.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use loam_types::SampleTable;

use crate::error::{Error, Result};
use crate::file::FileStore;
use crate::sqlite::SqliteStore;

/// Default connection pool size for the relational backend.
pub const DEFAULT_POOL_SIZE: u32 = 5;

/// Common contract for sensor data stores.
///
/// Backends present identical semantics: a record is stored atomically, a
/// stored record is visible to every later read from the same process, and
/// reads deliver rows sorted ascending by timestamp with the union of
/// field names as columns.
///
/// All methods take `&self`; implementations are internally synchronized
/// and writes for different clients never serialize against each other.
pub trait Storage: Send + Sync {
    /// Prepare the underlying medium (directories, tables, pools).
    /// Idempotent; failure here is fatal to the caller.
    fn initialize(&self) -> Result<()>;

    /// Normalize and persist one measurement payload for `client_id`.
    fn store(&self, client_id: &str, payload: Map<String, Value>) -> Result<()>;

    /// Sorted ids of every client with stored data.
    fn list_clients(&self) -> Result<Vec<String>>;

    /// Records for one client at or after the cutoff named by `range`,
    /// sorted ascending. `None` when the client has no records in range
    /// or its data cannot be read; per-client read failures degrade
    /// rather than propagate.
    fn retrieve(&self, client_id: &str, range: &str) -> Result<Option<SampleTable>>;

    /// Tables for every client with records in range, keyed by client id.
    fn retrieve_all(&self, range: &str) -> Result<BTreeMap<String, SampleTable>>;

    /// Release held resources. Idempotent; operations after the first
    /// close fail with [`Error::Closed`].
    fn close(&self) -> Result<()>;
}

/// Backend lifecycle. One-way: a closed store stays closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Uninitialized,
    Ready,
    Closed,
}

impl State {
    pub(crate) fn check_ready(self) -> Result<()> {
        match self {
            State::Ready => Ok(()),
            State::Uninitialized => Err(Error::NotInitialized),
            State::Closed => Err(Error::Closed),
        }
    }
}

/// Client ids become file names and row keys, so they are restricted to a
/// character set safe for both. Leading dots are rejected to keep logs
/// out of the hidden-file namespace.
pub(crate) fn check_client_id(client_id: &str) -> Result<()> {
    let valid = !client_id.is_empty()
        && !client_id.starts_with('.')
        && client_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidClientId(client_id.to_string()))
    }
}

/// Parameters for [`FileStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Directory holding one log per client.
    pub data_dir: PathBuf,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Parameters for [`SqliteStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteStoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Bounded connection pool size.
    pub pool_size: u32,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/loam.db"),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Backend selection plus its parameters.
///
/// The storage layer never reads configuration files or environment
/// variables itself; callers resolve settings and pass them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// One flat log per client.
    Csv(FileStoreConfig),
    /// Embedded relational database.
    Sqlite(SqliteStoreConfig),
}

/// Construct the backend named by `config`.
///
/// The instance starts uninitialized; the caller owns the lifecycle and
/// must call [`Storage::initialize`] before use.
pub fn open(config: &StorageConfig) -> Arc<dyn Storage> {
    match config {
        StorageConfig::Csv(csv) => {
            info!("Using flat-log storage at {}", csv.data_dir.display());
            Arc::new(FileStore::new(csv.data_dir.clone()))
        }
        StorageConfig::Sqlite(sqlite) => {
            info!(
                "Using relational storage at {} (pool: {})",
                sqlite.path.display(),
                sqlite.pool_size
            );
            Arc::new(SqliteStore::new(sqlite.path.clone(), sqlite.pool_size))
        }
    }
}

// A poisoned lock only means another thread panicked mid-operation; the
// guarded data is still structurally sound, so recover the guard.

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_client_id_accepts_safe_names() {
        for id in ["pi-garden", "sensor_01", "a", "ecowitt-ABC123", "v1.2"] {
            assert!(check_client_id(id).is_ok(), "rejected {id:?}");
        }
    }

    #[test]
    fn test_check_client_id_rejects_unsafe_names() {
        for id in ["", ".", ".hidden", "../escape", "a/b", "a b", "café", "a\0b"] {
            assert!(
                matches!(check_client_id(id), Err(Error::InvalidClientId(_))),
                "accepted {id:?}"
            );
        }
    }

    #[test]
    fn test_state_check_ready() {
        assert!(State::Ready.check_ready().is_ok());
        assert!(matches!(
            State::Uninitialized.check_ready(),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(State::Closed.check_ready(), Err(Error::Closed)));
    }

    #[test]
    fn test_backend_config_defaults() {
        assert_eq!(FileStoreConfig::default().data_dir, PathBuf::from("data"));

        let sqlite = SqliteStoreConfig::default();
        assert_eq!(sqlite.path, PathBuf::from("data/loam.db"));
        assert_eq!(sqlite.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn test_open_builds_uninitialized_backend() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&StorageConfig::Csv(FileStoreConfig {
            data_dir: dir.path().join("data"),
        }));

        assert!(matches!(storage.list_clients(), Err(Error::NotInitialized)));
        storage.initialize().unwrap();
        assert_eq!(storage.list_clients().unwrap(), Vec::<String>::new());
    }
}
