//! Application state shared across handlers.

use std::sync::Arc;

use loam_store::Storage;

use crate::config::Config;

/// Shared application state.
///
/// The storage handle is injected once at startup and shared by every
/// handler; handlers never construct backends or drive the storage
/// lifecycle themselves.
pub struct AppState {
    /// Active storage backend.
    pub storage: Arc<dyn Storage>,
    /// Resolved configuration.
    pub config: Config,
}

impl AppState {
    /// Create new application state.
    pub fn new(storage: Arc<dyn Storage>, config: Config) -> Arc<Self> {
        Arc::new(Self { storage, config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_store::{FileStoreConfig, StorageConfig, open};

    #[test]
    fn test_app_state_new() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&StorageConfig::Csv(FileStoreConfig {
            data_dir: dir.path().to_path_buf(),
        }));
        storage.initialize().unwrap();

        let state = AppState::new(storage, Config::default());
        assert_eq!(state.config.server.bind, "127.0.0.1:8080");
        assert!(state.storage.list_clients().unwrap().is_empty());
    }
}
