//! Storage error types

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The engine could not open or delete the database
    #[error("connection error: {0}")]
    Connection(String),

    /// The stored schema version is newer than the requested one
    #[error("database '{name}' is at version {current}, cannot open at version {requested}")]
    Version {
        name: String,
        current: u32,
        requested: u32,
    },

    /// Malformed table or index definition
    #[error("schema error: {0}")]
    Schema(String),

    /// A transaction could not be started, used or committed
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Duplicate primary key or unique index value
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Write attempted in a read-only transaction
    #[error("transaction is read-only")]
    ReadOnly,

    /// A record has no valid key, or a lookup value is not a key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Table does not exist
    #[error("table not found: {0}")]
    UnknownTable(String),

    /// Index does not exist on the table
    #[error("index '{index}' not found on table '{table}'")]
    UnknownIndex { table: String, index: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage backend error (database, filesystem, etc.)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Invalid settings
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
