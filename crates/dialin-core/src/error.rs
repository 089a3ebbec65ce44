//! Error types for dialin-core

use thiserror::Error;

/// Result type alias using dialin-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in dialin-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Storage adapter error
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found (or already tombstoned)
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Record id already present in the store
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
