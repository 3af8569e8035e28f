use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for s3fs operations
///
/// There is no not-found variant: lookups return `Option` and a miss in
/// both the index and the backend is `None`.
#[derive(Error, Debug)]
pub enum S3fsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed path: {0}")]
    MalformedPath(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    /// Failure reading or writing the metadata index
    #[error("Cache error: {0}")]
    Cache(String),
}

impl From<ConfigError> for S3fsError {
    fn from(err: ConfigError) -> Self {
        S3fsError::Config(err.to_string())
    }
}

impl From<rusqlite::Error> for S3fsError {
    fn from(err: rusqlite::Error) -> Self {
        S3fsError::Cache(err.to_string())
    }
}

/// Result type alias for s3fs operations
pub type Result<T> = std::result::Result<T, S3fsError>;
