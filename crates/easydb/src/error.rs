//! Common error types for the EasyDB facade.

use easydb_core::StoreError;
use thiserror::Error;

/// Error type for facade operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error from the engine or the table accessor
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A blocking engine task panicked or was cancelled
    #[error("task error: {0}")]
    Task(String),
}

impl Error {
    /// The storage error behind this error, if there is one.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            Error::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias using the facade Error.
pub type Result<T> = std::result::Result<T, Error>;
