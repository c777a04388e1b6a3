//! Common error types for SDW

use thiserror::Error;

/// Common result type for SDW operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across SDW services
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error for a configuration file
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
