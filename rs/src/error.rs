//! Store errors

use thiserror::Error;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
