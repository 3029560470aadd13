//! HTTP ingestion and query service for Loam sensor data.
//!
//! The service accepts measurement payloads from arbitrary clients,
//! persists them through a configurable storage backend, and serves them
//! back as time-ranged tables:
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/data/{client_id}` | POST | Ingest one JSON payload |
//! | `/api/clients` | GET | List clients with stored data |
//! | `/api/clients/{client_id}/data` | GET | One client's records |
//! | `/api/data` | GET | All clients' records |
//! | `/api/health` | GET | Liveness plus a storage probe |
//! | `/ecowitt` | POST | Ecowitt weather station push (configurable) |
//!
//! Query routes take `?range=` tokens (`all`, `<n>h`, `<n>d`, `<n>w`);
//! three days is the default. The storage backend is selected in
//! `loam.toml` and injected into the handlers at startup.

pub mod api;
pub mod config;
pub mod ecowitt;
pub mod state;

pub use config::{
    Backend, Config, ConfigError, EcowittConfig, ServerConfig, StorageSection, Units,
    ValidationError,
};
pub use state::AppState;
