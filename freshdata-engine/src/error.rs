//! Error types for freshdata-engine
//!
//! Only configuration problems and `DataUnavailable` reach callers of the
//! refresh path. Fetch failures are retried locally and validation failures are
//! reported inside `ValidationResult::issues`.
//!
//! `Error` is `Clone` because one refresh result is shared by every caller
//! coalesced onto the same in-flight refresh.

use thiserror::Error;

/// Main error type for freshdata-engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Data type id not present in the registry
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    /// Every attempt against every source failed
    #[error("All sources exhausted for {data_type_id} after {attempts} attempts: {last_error}")]
    SourceExhausted {
        data_type_id: String,
        attempts: u32,
        last_error: String,
    },

    /// No usable value exists, cached or fresh
    #[error("Data unavailable for {data_type_id}: {reason}")]
    DataUnavailable { data_type_id: String, reason: String },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<freshdata_common::Error> for Error {
    fn from(err: freshdata_common::Error) -> Self {
        match err {
            freshdata_common::Error::Config(msg) => Error::Config(msg),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using freshdata-engine Error
pub type Result<T> = std::result::Result<T, Error>;
