//! Error types for the SQLite storage engine

use easydb_core::storage::StoreError;
use thiserror::Error;

/// Result type for SQLite engine internals
pub type Result<T> = std::result::Result<T, SqliteError>;

/// Errors that can occur inside the SQLite engine
#[derive(Debug, Error)]
pub enum SqliteError {
    /// Database connection or query error
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error (for file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A storage-level failure (constraint, unknown table, ...)
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convert SqliteError to StoreError for the engine traits
impl From<SqliteError> for StoreError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Store(e) => e,
            SqliteError::Json(e) => StoreError::Serialization(e.to_string()),
            SqliteError::Database(e) => StoreError::Backend(format!("SQLite: {}", e)),
            SqliteError::Migration(msg) => StoreError::Backend(format!("Migration: {}", msg)),
            SqliteError::Io(e) => StoreError::Backend(format!("IO: {}", e)),
        }
    }
}
