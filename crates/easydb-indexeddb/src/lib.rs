//! IndexedDB storage engine for EasyDB (browser WASM)
//!
//! This crate stores EasyDB databases in the browser's IndexedDB, with the
//! same schema declarations and table operations as the native engines.
//!
//! Because IndexedDB is inherently asynchronous, [`IdbTable`] provides async
//! methods that mirror the synchronous `TableAccessor` from easydb-core. Same
//! method names, same inputs, same outputs, same error semantics. Schema
//! upgrades reuse the core schema manager: IndexedDB's versionchange
//! transaction is driven through the core `SchemaEditor` trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use easydb_core::{IndexDefinition, Order, Settings, TableDefinition};
//! use easydb_indexeddb::IndexedDb;
//! use serde_json::json;
//!
//! let settings = Settings::new("app", 1).table(
//!     TableDefinition::new("users", "id")
//!         .index(IndexDefinition::new("by_email", "email").unique()),
//! );
//! let db = IndexedDb::open(settings).await?;
//! let users = db.table("users");
//!
//! users.insert(json!({"id": 1, "email": "a@x.com"}), false).await?;
//! let found = users.find_by("by_email", &json!("a@x.com")).await?;
//! let newest = users.limit(10, 0, Order::Desc).await?;
//! ```

pub mod error;
pub mod idb;
pub mod js;
pub mod store;

pub use error::{IndexedDbError, Result};
pub use store::{IdbTable, IndexedDb};
