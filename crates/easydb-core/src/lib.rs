//! EasyDB Core
//!
//! This crate provides the storage model shared by every EasyDB backend:
//! keys and key paths, schema declarations, the engine traits, an in-memory
//! engine and the synchronous table accessor built on top of them.
//!
//! Backends:
//!
//! - [`storage::MemoryEngine`] - in-process, used by tests and native callers
//! - `easydb-sqlite` - persistent native storage
//! - `easydb-indexeddb` - browser storage (WASM)
//!
//! # Example
//!
//! ```rust
//! use easydb_core::{
//!     ConnectionManager, IndexDefinition, Order, Settings, TableAccessor, TableDefinition,
//! };
//! use easydb_core::storage::MemoryEngine;
//! use serde_json::json;
//!
//! let settings = Settings::new("app", 1).table(
//!     TableDefinition::new("users", "id")
//!         .index(IndexDefinition::new("by_email", "email").unique()),
//! );
//! let connections = ConnectionManager::new(MemoryEngine::new(), settings).unwrap();
//! let users = TableAccessor::new("users", connections);
//!
//! users
//!     .insert(json!([{"id": 1, "email": "a@x.com"}, {"id": 2, "email": "b@x.com"}]), false)
//!     .unwrap();
//!
//! let found = users.find_by("by_email", &json!("b@x.com")).unwrap();
//! assert_eq!(found, vec![json!({"id": 2, "email": "b@x.com"})]);
//!
//! let newest = users.limit(1, 0, Order::Desc).unwrap();
//! assert_eq!(newest[0]["id"], 2);
//! ```

pub mod connection;
pub mod key;
pub mod record;
pub mod schema;
pub mod storage;
pub mod table;

// Re-export main types at crate root
pub use connection::ConnectionManager;
pub use key::{Key, KeyPath};
pub use record::{matching, Record, Records};
pub use schema::{
    apply_schema, ConnectionSettings, IndexDefinition, IndexOptions, Settings, TableDefinition,
    UpgradeStrategy,
};
pub use storage::{StoreError, StoreResult};
pub use table::{Order, TableAccessor};
