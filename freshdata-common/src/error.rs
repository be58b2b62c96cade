//! Common error types for freshdata

use thiserror::Error;

/// Common result type for freshdata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the engine and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML document could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
