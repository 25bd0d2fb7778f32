//! # EasyDB
//!
//! An embedded key/table store with secondary indexes, modeled on IndexedDB:
//! named, versioned databases hold tables of JSON records keyed by a key path,
//! with optional (unique) indexes over other fields.
//!
//! This crate is the async entry point:
//! - **db**: [`EasyDb`] and [`Table`], running engine work on tokio's blocking pool
//! - **error**: the facade error type
//! - **tracing**: logging setup for applications
//!
//! Engines: [`MemoryEngine`] always, [`SqliteEngine`] with the `sqlite`
//! feature (default). The browser engine lives in `easydb-indexeddb`.
//!
//! ## Usage
//!
//! ```rust
//! use easydb::{EasyDb, IndexDefinition, MemoryEngine, Order, Settings, TableDefinition};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> easydb::Result<()> {
//! let settings = Settings::new("app", 1).table(
//!     TableDefinition::new("users", "id")
//!         .index(IndexDefinition::new("by_email", "email").unique()),
//! );
//! let db = EasyDb::new(MemoryEngine::new(), Some(settings)).await?;
//! let users = db.open("users");
//!
//! users.insert(json!({"id": 1, "email": "a@x.com"}), false).await?;
//! let found = users.find_by("by_email", &json!("a@x.com")).await?;
//! assert_eq!(found.len(), 1);
//!
//! let newest = users.limit(10, 0, Order::Desc).await?;
//! assert_eq!(newest[0]["id"], 1);
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod error;
pub mod tracing;

pub use db::{EasyDb, Table};
pub use error::{Error, Result};

// Re-export the storage model so applications need only this crate
pub use easydb_core::storage::MemoryEngine;
pub use easydb_core::{
    matching, IndexDefinition, IndexOptions, Key, KeyPath, Order, Record, Records, Settings,
    StoreError, TableDefinition, UpgradeStrategy,
};

#[cfg(feature = "sqlite")]
pub use easydb_sqlite::SqliteEngine;
