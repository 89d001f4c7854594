//! Error types for stormfeed

use thiserror::Error;

/// Result type alias for common stormfeed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unknown source type: {0}")]
    UnknownSourceType(String),
}
