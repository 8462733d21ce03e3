//! Error types for shadow-core

use thiserror::Error;

/// Result type alias using shadow-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shadow-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or model not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote source unreachable or returned malformed data
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Checkpoint rejected because a required field is missing
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single change could not be classified or written
    #[error("Apply error: {0}")]
    Apply(String),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::Fetch(error.to_string())
    }
}
