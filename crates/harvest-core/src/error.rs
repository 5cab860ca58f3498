use thiserror::Error;

/// Top-level error type shared by the Harvest crates.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
