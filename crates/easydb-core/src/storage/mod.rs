//! Storage engine abstraction
//!
//! This module defines the engine traits every backend implements.
//! Implementations exist for:
//!
//! - **Memory**: in-memory storage for testing (`MemoryEngine`)
//! - **SQLite**: native SQLite via rusqlite (separate crate, native only)
//! - **IndexedDB**: browser storage via web-sys (separate crate, WASM only;
//!   async, so it mirrors these operations instead of implementing the traits)
//!
//! # Example
//!
//! ```rust
//! use easydb_core::storage::{
//!     Connection, MemoryEngine, SchemaEditor, StorageEngine, TransactionMode,
//! };
//! use easydb_core::KeyPath;
//! use serde_json::json;
//!
//! let engine = MemoryEngine::new();
//! let mut conn = engine
//!     .open("app", 1, &mut |editor: &mut dyn SchemaEditor, _| {
//!         editor.create_table("notes", &KeyPath::from("id"))
//!     })
//!     .unwrap();
//!
//! let mut tx = conn.transaction(&["notes"], TransactionMode::ReadWrite).unwrap();
//! tx.add("notes", &json!({"id": 1, "text": "hello"})).unwrap();
//! tx.commit().unwrap();
//! ```

mod error;
mod memory;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryConnection, MemoryEngine};
pub use traits::{
    Connection, Cursor, Direction, SchemaEditor, StorageEngine, Transaction, TransactionMode,
    UpgradeFn,
};
