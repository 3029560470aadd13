//! Error types for loam-store.

use std::path::PathBuf;

/// Result type for loam-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in loam-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool unavailable or exhausted past its timeout.
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Flat-log read or write error.
    #[error("Log error: {0}")]
    Csv(#[from] csv::Error),

    /// Stored log content that cannot be interpreted.
    #[error("Malformed log {path}: {message}")]
    MalformedLog {
        /// Path of the offending log file.
        path: PathBuf,
        /// What failed to parse.
        message: String,
    },

    /// Failed to create the data directory.
    #[error("Failed to create data directory {path}: {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Client id unusable as a storage partition key.
    #[error("Invalid client id: {0:?}")]
    InvalidClientId(String),

    /// Payload rejected during normalization.
    #[error(transparent)]
    Record(#[from] loam_types::RecordError),

    /// Timestamp outside the representable range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation attempted before `initialize`.
    #[error("Storage backend has not been initialized")]
    NotInitialized,

    /// Operation attempted after `close`.
    #[error("Storage backend is closed")]
    Closed,
}
