//! Server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use loam_store::{FileStoreConfig, SqliteStoreConfig, StorageConfig};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageSection,
    /// Ecowitt weather station ingestion.
    pub ecowitt: EcowittConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when no file exists there.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - The active backend's paths are not empty
    /// - The relational pool size is within bounds (1 - 100)
    /// - The Ecowitt route path starts with `/`
    ///
    /// # Example
    ///
    /// ```
    /// use loam_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.ecowitt.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    ///
    /// This is a convenience method that combines `load()` and `validate()`.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
        if parts.len() != 2 {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            });
            return errors;
        }

        match parts[0].parse::<u16>() {
            Ok(0) => {
                errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: "port cannot be 0".to_string(),
                });
            }
            Err(_) => {
                errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!("invalid port '{}': must be a number 1-65535", parts[0]),
                });
            }
            Ok(_) => {}
        }

        errors
    }
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One flat log per client.
    #[default]
    #[serde(alias = "file")]
    Csv,
    /// Embedded relational database.
    #[serde(alias = "relational")]
    Sqlite,
}

/// Smallest accepted relational pool size.
pub const MIN_POOL_SIZE: u32 = 1;
/// Largest accepted relational pool size.
pub const MAX_POOL_SIZE: u32 = 100;

/// Storage configuration.
///
/// Both backend sections may be present in the file; `backend` names the
/// active one and the other is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Active backend.
    pub backend: Backend,
    /// Flat-log backend parameters.
    pub csv: FileStoreConfig,
    /// Relational backend parameters.
    pub sqlite: SqliteStoreConfig,
}

impl StorageSection {
    /// Resolve the active backend's parameters for the storage factory.
    pub fn to_storage_config(&self) -> StorageConfig {
        match self.backend {
            Backend::Csv => StorageConfig::Csv(self.csv.clone()),
            Backend::Sqlite => StorageConfig::Sqlite(self.sqlite.clone()),
        }
    }

    /// Validate storage configuration. Only the active backend's
    /// parameters are checked.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        match self.backend {
            Backend::Csv => {
                if self.csv.data_dir.as_os_str().is_empty() {
                    errors.push(ValidationError {
                        field: "storage.csv.data_dir".to_string(),
                        message: "data directory cannot be empty".to_string(),
                    });
                }
            }
            Backend::Sqlite => {
                if self.sqlite.path.as_os_str().is_empty() {
                    errors.push(ValidationError {
                        field: "storage.sqlite.path".to_string(),
                        message: "database path cannot be empty".to_string(),
                    });
                }
                if !(MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&self.sqlite.pool_size) {
                    errors.push(ValidationError {
                        field: "storage.sqlite.pool_size".to_string(),
                        message: format!(
                            "pool size {} out of range ({} - {})",
                            self.sqlite.pool_size, MIN_POOL_SIZE, MAX_POOL_SIZE
                        ),
                    });
                }
            }
        }

        errors
    }
}

/// Unit system for stored Ecowitt values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Convert the station's imperial payload before storing.
    #[default]
    Metric,
    /// Store values exactly as the station sent them.
    Imperial,
}

/// Ecowitt weather station ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EcowittConfig {
    /// Whether the ingestion route is mounted.
    pub enabled: bool,
    /// Route path stations push to.
    pub path: String,
    /// Fixed client id for stored records. Defaults to an id derived from
    /// the station's PASSKEY.
    pub client_name: Option<String>,
    /// Unit system for stored values.
    pub units: Units,
}

impl Default for EcowittConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/ecowitt".to_string(),
            client_name: None,
            units: Units::Metric,
        }
    }
}

impl EcowittConfig {
    /// Validate Ecowitt configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.path.starts_with('/') {
            errors.push(ValidationError {
                field: "ecowitt.path".to_string(),
                message: format!("route path '{}' must start with '/'", self.path),
            });
        }

        if let Some(name) = &self.client_name
            && name.is_empty()
        {
            errors.push(ValidationError {
                field: "ecowitt.client_name".to_string(),
                message: "client name cannot be empty string (use null/omit instead)".to_string(),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `storage.sqlite.pool_size`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path: `loam.toml` in the working directory,
/// with a `LOAM_CONFIG` environment override.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("LOAM_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("loam.toml"))
}
