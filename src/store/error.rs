//! Metadata store error types
//!
//! Defines all errors that can occur while reading or writing the engine's
//! own bookkeeping tables.

use thiserror::Error;

/// Errors that can occur in the metadata store
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite rejected a statement or transaction
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O operation failed (creating the database directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored timestamp is outside the representable range
    #[error("Invalid timestamp in store: {0}")]
    InvalidTimestamp(i64),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
