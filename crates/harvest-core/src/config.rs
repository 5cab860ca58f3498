//! Configuration management for Harvest tools.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (HARVEST__ prefix, `__` separator)
//! 2. Config file (harvest.toml)
//! 3. Defaults

use serde::Deserialize;

use crate::error::HarvestError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how the engagement database is opened.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Path to the SQLite engagement file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// How long a writer waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Create the file and schema when the path does not exist yet.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_db_path() -> String {
    "./engagement.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            create_if_missing: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl HarvestConfig {
    /// Load from `{file_prefix}.toml` (optional) layered under `HARVEST__*`
    /// environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, HarvestError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("HARVEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: HarvestConfig = cfg.try_deserialize()?;
        tracing::debug!(db_path = %loaded.database.path, "Configuration loaded");
        Ok(loaded)
    }
}
