//! Application configuration.
//!
//! Aggregates bus and storage configuration into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod bus;
mod storage;

pub use bus::{
    BusConfig, DEFAULT_CLOSE_CODE_SESSION_EXPIRED, DEFAULT_DATABASE, DEFAULT_HORIZON_SECS,
    DEFAULT_NOTIFICATION_TOPIC, DEFAULT_NOTIFY_FUNCTION, DEFAULT_NOTIFY_PAYLOAD_MAX_BYTES,
    DEFAULT_VACUUM_INTERVAL_SECS,
};
pub use storage::{PostgresConfig, SqliteConfig, StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "imbus.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "IMBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "IMBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "IMBUS_LOG";

use serde::Deserialize;

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bus behaviour (horizon, topic, close codes).
    pub bus: BusConfig,
    /// Event log and notification backend.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `imbus.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` separated
    ///    (e.g. `IMBUS__BUS__HORIZON_SECS=30`)
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create config for testing: in-memory storage, defaults elsewhere.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                storage_type: StorageType::Memory,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
