//! Storage engine trait definitions
//!
//! The traits follow the shape of the IndexedDB API: a factory opens named,
//! versioned databases (running an upgrade callback when the version moves
//! forward), connections start transactions over a set of tables, and
//! transactions expose keyed writes, lookups and cursors.

use crate::key::{Key, KeyPath};
use crate::record::Record;
use crate::schema::IndexDefinition;
use crate::storage::error::StoreResult;

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Cursor traversal direction over keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order
    #[default]
    Next,
    /// Descending key order
    Prev,
}

/// Upgrade callback: receives the schema editor and the version the database
/// was at before the upgrade (0 for a new database).
pub type UpgradeFn<'a> = dyn FnMut(&mut dyn SchemaEditor, u32) -> StoreResult<()> + 'a;

/// A storage engine: the factory for database connections.
pub trait StorageEngine {
    type Connection: Connection;

    /// Open the database `name` at `version`.
    ///
    /// When the stored version is below `version`, `upgrade` runs inside a
    /// single versionchange transaction before the connection is returned. A
    /// failing upgrade leaves the database untouched and fails the open. A
    /// stored version above `version` is `StoreError::Version`.
    fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> StoreResult<Self::Connection>;

    /// Delete the database `name` and everything in it. Deleting a database
    /// that does not exist succeeds.
    fn delete_database(&self, name: &str) -> StoreResult<()>;
}

/// Table and index definition operations, available only during an upgrade.
pub trait SchemaEditor {
    /// Names of all tables, sorted.
    fn table_names(&self) -> StoreResult<Vec<String>>;

    /// Create an empty table. Fails with `StoreError::Schema` if it exists.
    fn create_table(&mut self, name: &str, key_path: &KeyPath) -> StoreResult<()>;

    /// Drop a table with its records and indexes.
    /// Fails with `StoreError::UnknownTable` if it does not exist.
    fn delete_table(&mut self, name: &str) -> StoreResult<()>;

    /// Create an index and populate it from the table's existing records.
    fn create_index(&mut self, table: &str, index: &IndexDefinition) -> StoreResult<()>;

    /// Names of the table's indexes, sorted.
    fn index_names(&self, table: &str) -> StoreResult<Vec<String>>;
}

/// An open database connection.
pub trait Connection {
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    fn table_names(&self) -> StoreResult<Vec<String>>;

    /// Start a transaction scoped to `tables`.
    ///
    /// Dropping the transaction without committing rolls it back.
    fn transaction(
        &mut self,
        tables: &[&str],
        mode: TransactionMode,
    ) -> StoreResult<Box<dyn Transaction + '_>>;
}

/// A transaction over one or more tables.
pub trait Transaction {
    /// Insert a record; fails with `StoreError::Constraint` if its key exists.
    fn add(&mut self, table: &str, record: &Record) -> StoreResult<Key>;

    /// Insert or replace a record.
    fn put(&mut self, table: &str, record: &Record) -> StoreResult<Key>;

    fn get(&self, table: &str, key: &Key) -> StoreResult<Option<Record>>;

    /// Returns `true` if a record was deleted.
    fn delete(&mut self, table: &str, key: &Key) -> StoreResult<bool>;

    fn clear(&mut self, table: &str) -> StoreResult<()>;

    fn count(&self, table: &str) -> StoreResult<usize>;

    /// Cursor over the whole table in primary-key order.
    fn open_cursor(&self, table: &str, direction: Direction) -> StoreResult<Box<dyn Cursor + '_>>;

    /// Cursor over the records whose `index` key equals `key`, in primary-key
    /// order.
    fn open_index_cursor(
        &self,
        table: &str,
        index: &str,
        key: &Key,
        direction: Direction,
    ) -> StoreResult<Box<dyn Cursor + '_>>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// A positioned cursor. A cursor with no current record is exhausted.
pub trait Cursor {
    /// The current record, `None` once exhausted.
    fn value(&self) -> Option<&Record>;

    /// Move to the next record in the cursor's direction.
    fn advance(&mut self) -> StoreResult<()>;

    /// Skip `count` records, stopping early at the end.
    fn advance_by(&mut self, count: usize) -> StoreResult<()> {
        for _ in 0..count {
            if self.value().is_none() {
                break;
            }
            self.advance()?;
        }
        Ok(())
    }
}
