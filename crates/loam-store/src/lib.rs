//! Pluggable persistence for Loam sensor readings.
//!
//! Two backends implement the [`Storage`] contract:
//!
//! - [`FileStore`]: one append-only CSV log per client, with a
//!   fingerprint-checked cache of parsed tables.
//! - [`SqliteStore`]: a single SQLite table with typed columns for the
//!   hottest fields and a JSON side-channel for everything else, behind a
//!   bounded connection pool.
//!
//! Both present identical semantics for ingestion, time-ranged retrieval,
//! multi-client aggregation and lifecycle, so callers can switch backends
//! through configuration alone. Construct one with [`open`] and drive its
//! lifecycle from a single owner:
//!
//! ```no_run
//! use loam_store::{FileStoreConfig, StorageConfig, open};
//!
//! let storage = open(&StorageConfig::Csv(FileStoreConfig {
//!     data_dir: "data".into(),
//! }));
//! storage.initialize()?;
//!
//! let mut payload = serde_json::Map::new();
//! payload.insert("temperature".into(), 23.5.into());
//! storage.store("pi-garden", payload)?;
//!
//! for client in storage.list_clients()? {
//!     if let Some(table) = storage.retrieve(&client, "1d")? {
//!         println!("{client}: {} records", table.len());
//!     }
//! }
//! storage.close()?;
//! # Ok::<(), loam_store::Error>(())
//! ```

mod error;
mod file;
mod schema;
mod sqlite;
mod store;

pub use error::{Error, Result};
pub use file::FileStore;
pub use sqlite::SqliteStore;
pub use store::{
    DEFAULT_POOL_SIZE, FileStoreConfig, SqliteStoreConfig, Storage, StorageConfig, open,
};
