//! Error types for the IndexedDB storage engine

use easydb_core::storage::StoreError;
use thiserror::Error;
use wasm_bindgen::JsCast;

/// Result type for IndexedDB operations
pub type Result<T> = std::result::Result<T, IndexedDbError>;

/// Errors that can occur during IndexedDB operations
#[derive(Debug, Error)]
pub enum IndexedDbError {
    /// IndexedDB is not available in this environment
    #[error("IndexedDB not available: {0}")]
    NotAvailable(String),

    /// Database open/upgrade error
    #[error("IndexedDB open error: {0}")]
    Open(String),

    /// Transaction error
    #[error("IndexedDB transaction error: {0}")]
    Transaction(String),

    /// Request error from IDB operation
    #[error("IndexedDB request error: {0}")]
    Request(String),

    /// A DOMException raised by the browser (ConstraintError, DataError, ...)
    #[error("{name}: {message}")]
    Dom { name: String, message: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A storage-level failure detected before reaching the browser
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<wasm_bindgen::JsValue> for IndexedDbError {
    fn from(val: wasm_bindgen::JsValue) -> Self {
        if let Some(dom) = val.dyn_ref::<web_sys::DomException>() {
            return IndexedDbError::Dom {
                name: dom.name(),
                message: dom.message(),
            };
        }
        let msg = js_sys::JSON::stringify(&val)
            .map(String::from)
            .unwrap_or_else(|_| format!("{:?}", val));
        IndexedDbError::Request(msg)
    }
}

/// Convert IndexedDbError to StoreError, mapping DOMException names onto the
/// storage error kinds they correspond to
impl From<IndexedDbError> for StoreError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::Store(e) => e,
            IndexedDbError::Dom { name, message } => match name.as_str() {
                "ConstraintError" => StoreError::Constraint(message),
                "DataError" => StoreError::InvalidKey(message),
                "ReadOnlyError" => StoreError::ReadOnly,
                "VersionError" => StoreError::Connection(message),
                "TransactionInactiveError" | "AbortError" => StoreError::Transaction(message),
                _ => StoreError::Backend(format!("IndexedDB {}: {}", name, message)),
            },
            IndexedDbError::Json(e) => StoreError::Serialization(e.to_string()),
            IndexedDbError::NotAvailable(msg) => {
                StoreError::Connection(format!("IndexedDB not available: {}", msg))
            }
            IndexedDbError::Open(msg) => StoreError::Connection(format!("IndexedDB open: {}", msg)),
            IndexedDbError::Transaction(msg) => StoreError::Transaction(msg),
            IndexedDbError::Request(msg) => {
                StoreError::Backend(format!("IndexedDB request: {}", msg))
            }
        }
    }
}
