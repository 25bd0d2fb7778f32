//! SQLite storage engine for EasyDB
//!
//! This crate provides a persistent implementation of the easydb-core engine
//! traits, so native platforms can keep EasyDB databases on disk with the same
//! semantics as the in-memory and browser engines.
//!
//! # Features
//!
//! - Implements `StorageEngine`, `Connection`, `Transaction` and `Cursor`
//! - One SQLite file per logical database, or private in-memory databases
//! - Versioned upgrades run inside a single SQLite transaction
//! - Primary and index keys stored in an order-preserving binary encoding
//!
//! # Example
//!
//! ```rust,no_run
//! use easydb_core::{ConnectionManager, Settings, TableAccessor};
//! use easydb_sqlite::SqliteEngine;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SqliteEngine::open_dir("./data")?;
//! let connections = ConnectionManager::new(engine, Settings::default())?;
//! let table = TableAccessor::new("sample_table", connections);
//!
//! table.insert(json!({"id": 1, "name": "first"}), false)?;
//! assert_eq!(table.count()?, 1);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod migrate;

// Re-export main types
pub use engine::{SqliteConnection, SqliteEngine};
pub use error::{Result, SqliteError};
