//! Table accessor
//!
//! A [`TableAccessor`] is a handle scoped to one table. It holds only the
//! table name and the connection manager; every operation opens its own
//! connection and a single transaction, performs one key or cursor operation,
//! and commits.
//!
//! Failures from any step are logged once here, with the table and operation,
//! and returned to the caller. Writes are atomic per call: a batch either
//! lands completely or not at all.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::error;

use crate::connection::ConnectionManager;
use crate::key::Key;
use crate::record::{Record, Records};
use crate::storage::{
    Connection, Cursor, Direction, StorageEngine, StoreError, StoreResult, Transaction,
    TransactionMode,
};

/// Traversal order for [`TableAccessor::limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Ascending primary key
    Asc,
    /// Descending primary key
    #[default]
    Desc,
}

impl Order {
    pub fn direction(self) -> Direction {
        match self {
            Order::Asc => Direction::Next,
            Order::Desc => Direction::Prev,
        }
    }
}

impl FromStr for Order {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            other => Err(StoreError::Config(format!(
                "unknown order '{}', expected 'asc' or 'desc'",
                other
            ))),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Asc => f.write_str("asc"),
            Order::Desc => f.write_str("desc"),
        }
    }
}

/// Synchronous operations on one table.
pub struct TableAccessor<E> {
    name: String,
    connections: ConnectionManager<E>,
}

impl<E> Clone for TableAccessor<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            connections: self.connections.clone(),
        }
    }
}

impl<E: StorageEngine> TableAccessor<E> {
    pub fn new(name: impl Into<String>, connections: ConnectionManager<E>) -> Self {
        Self {
            name: name.into(),
            connections,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every record in ascending primary-key order.
    pub fn all(&self) -> StoreResult<Vec<Record>> {
        self.read("all", |tx, table| {
            let mut cursor = tx.open_cursor(table, Direction::Next)?;
            collect_while(cursor.as_mut(), |_| true, usize::MAX)
        })
    }

    /// Records whose `index` key equals `value`, in primary-key order.
    ///
    /// A unique index yields at most one record. No match yields an empty list.
    pub fn find_by(&self, index: &str, value: &Value) -> StoreResult<Vec<Record>> {
        self.read("find_by", |tx, table| {
            let key = lookup_key(value)?;
            let mut cursor = tx.open_index_cursor(table, index, &key, Direction::Next)?;
            collect_while(cursor.as_mut(), |_| true, usize::MAX)
        })
    }

    /// The first record (by primary key) whose `index` key equals `value`.
    pub fn find_one_by(&self, index: &str, value: &Value) -> StoreResult<Option<Record>> {
        self.read("find_one_by", |tx, table| {
            let key = lookup_key(value)?;
            let cursor = tx.open_index_cursor(table, index, &key, Direction::Next)?;
            let record = cursor.value().cloned();
            Ok(record)
        })
    }

    /// Up to `count` records after skipping `offset`, walking the primary key
    /// in `order`.
    pub fn limit(&self, count: usize, offset: usize, order: Order) -> StoreResult<Vec<Record>> {
        self.read("limit", |tx, table| {
            if count == 0 {
                return Ok(Vec::new());
            }
            let mut cursor = tx.open_cursor(table, order.direction())?;
            cursor.advance_by(offset)?;
            collect_while(cursor.as_mut(), |_| true, count)
        })
    }

    /// Every record satisfying `predicate`, in primary-key order.
    #[doc(alias = "where")]
    pub fn filter<P>(&self, predicate: P) -> StoreResult<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        self.read("filter", |tx, table| {
            let mut cursor = tx.open_cursor(table, Direction::Next)?;
            collect_while(cursor.as_mut(), &predicate, usize::MAX)
        })
    }

    /// The record stored under `key`.
    pub fn get(&self, key: &Key) -> StoreResult<Option<Record>> {
        self.read("get", |tx, table| tx.get(table, key))
    }

    pub fn count(&self) -> StoreResult<usize> {
        self.read("count", |tx, table| tx.count(table))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert one record or a batch.
    ///
    /// With `overwrite` false an existing primary key fails the whole batch
    /// with `StoreError::Constraint`; with `overwrite` true records are upserted.
    /// Returns the primary keys written, in input order.
    pub fn insert(&self, data: impl Into<Records>, overwrite: bool) -> StoreResult<Vec<Key>> {
        let records = data.into();
        self.write("insert", |tx, table| write_all(tx, table, &records, overwrite))
    }

    /// Upsert one record or a batch. Same as `insert(data, true)`.
    pub fn update(&self, data: impl Into<Records>) -> StoreResult<Vec<Key>> {
        self.insert(data, true)
    }

    /// Replace the table's contents with `data` in one transaction.
    pub fn replace(&self, data: impl Into<Records>) -> StoreResult<Vec<Key>> {
        let records = data.into();
        self.write("replace", |tx, table| {
            tx.clear(table)?;
            write_all(tx, table, &records, false)
        })
    }

    /// Delete the record stored under `key`. Returns `true` if one existed.
    pub fn delete(&self, key: &Key) -> StoreResult<bool> {
        self.write("delete", |tx, table| tx.delete(table, key))
    }

    /// Remove every record.
    pub fn clear(&self) -> StoreResult<()> {
        self.write("clear", |tx, table| tx.clear(table))
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn read<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&dyn Transaction, &str) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let result = self.connections.open().and_then(|mut conn| {
            let tx = conn.transaction(&[self.name.as_str()], TransactionMode::ReadOnly)?;
            let out = f(tx.as_ref(), &self.name)?;
            tx.commit()?;
            Ok(out)
        });
        self.report(op, result)
    }

    fn write<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut dyn Transaction, &str) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let result = self.connections.open().and_then(|mut conn| {
            let mut tx = conn.transaction(&[self.name.as_str()], TransactionMode::ReadWrite)?;
            let out = f(tx.as_mut(), &self.name)?;
            tx.commit()?;
            Ok(out)
        });
        self.report(op, result)
    }

    /// The single error path: log the failure, hand it back.
    fn report<T>(&self, op: &'static str, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(e) = &result {
            error!(
                database = %self.connections.settings().connection.name,
                table = %self.name,
                op,
                error = %e,
                "table operation failed"
            );
        }
        result
    }
}

fn lookup_key(value: &Value) -> StoreResult<Key> {
    Key::from_value(value)
        .ok_or_else(|| StoreError::InvalidKey(format!("{} is not a valid key", value)))
}

/// Walk `cursor`, keeping records accepted by `keep`, until `limit` records
/// are collected or the cursor is exhausted.
fn collect_while(
    cursor: &mut dyn Cursor,
    keep: impl Fn(&Record) -> bool,
    limit: usize,
) -> StoreResult<Vec<Record>> {
    let mut records = Vec::new();
    while records.len() < limit {
        let Some(record) = cursor.value() else {
            break;
        };
        if keep(record) {
            records.push(record.clone());
            if records.len() == limit {
                break;
            }
        }
        cursor.advance()?;
    }
    Ok(records)
}

fn write_all(
    tx: &mut dyn Transaction,
    table: &str,
    records: &Records,
    overwrite: bool,
) -> StoreResult<Vec<Key>> {
    records
        .iter()
        .map(|record| {
            if overwrite {
                tx.put(table, record)
            } else {
                tx.add(table, record)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::matching;
    use crate::schema::{IndexDefinition, Settings, TableDefinition};
    use crate::storage::MemoryEngine;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn users() -> TableAccessor<MemoryEngine> {
        let settings = Settings::new("app", 1).table(
            TableDefinition::new("users", "id")
                .index(IndexDefinition::new("by_email", "email").unique())
                .index(IndexDefinition::new("by_role", "role")),
        );
        let connections = ConnectionManager::new(MemoryEngine::new(), settings).unwrap();
        TableAccessor::new("users", connections)
    }

    fn numbered(table: &TableAccessor<MemoryEngine>) {
        let records: Vec<Record> = (1..=5).map(|id| json!({"id": id})).collect();
        table.insert(records, false).unwrap();
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_all_empty_and_single() {
        let table = users();
        assert!(table.all().unwrap().is_empty());

        table.insert(json!({"id": 1, "email": "a@x.com"}), false).unwrap();
        assert_eq!(table.all().unwrap(), vec![json!({"id": 1, "email": "a@x.com"})]);
    }

    #[test]
    fn test_insert_existing_key_keeps_original() {
        let table = users();
        table.insert(json!({"id": 1, "name": "first"}), false).unwrap();

        let result = table.insert(json!({"id": 1, "name": "second"}), false);
        assert!(matches!(result, Err(StoreError::Constraint(_))));
        assert_eq!(table.all().unwrap(), vec![json!({"id": 1, "name": "first"})]);

        table.insert(json!({"id": 1, "name": "third"}), true).unwrap();
        assert_eq!(table.all().unwrap(), vec![json!({"id": 1, "name": "third"})]);
    }

    #[test]
    fn test_failed_batch_is_atomic() {
        let table = users();
        table.insert(json!({"id": 2}), false).unwrap();

        let result = table.insert(json!([{"id": 1}, {"id": 2}, {"id": 3}]), false);
        assert!(result.is_err());
        assert_eq!(ids(&table.all().unwrap()), vec![2]);
    }

    #[test]
    fn test_insert_returns_keys() {
        let table = users();
        let keys = table.insert(json!([{"id": 2}, {"id": 1}]), false).unwrap();
        assert_eq!(keys, vec![Key::from(2), Key::from(1)]);
    }

    #[test]
    fn test_update_upserts() {
        let table = users();
        table.update(json!({"id": 1, "v": 1})).unwrap();
        table.update(json!([{"id": 1, "v": 2}, {"id": 2, "v": 1}])).unwrap();
        assert_eq!(
            table.all().unwrap(),
            vec![json!({"id": 1, "v": 2}), json!({"id": 2, "v": 1})]
        );
    }

    #[test]
    fn test_find_by() {
        let table = users();
        table
            .insert(
                json!([
                    {"id": 1, "email": "a@x.com", "role": "admin"},
                    {"id": 2, "email": "b@x.com", "role": "user"},
                    {"id": 3, "email": "c@x.com", "role": "admin"}
                ]),
                false,
            )
            .unwrap();

        assert_eq!(
            table.find_by("by_email", &json!("a@x.com")).unwrap(),
            vec![json!({"id": 1, "email": "a@x.com", "role": "admin"})]
        );
        assert_eq!(ids(&table.find_by("by_role", &json!("admin")).unwrap()), vec![1, 3]);
        assert!(table.find_by("by_email", &json!("z@x.com")).unwrap().is_empty());
        assert_eq!(
            table.find_one_by("by_role", &json!("user")).unwrap(),
            Some(json!({"id": 2, "email": "b@x.com", "role": "user"}))
        );
        assert_eq!(table.find_one_by("by_role", &json!("guest")).unwrap(), None);
    }

    #[test]
    fn test_find_by_errors() {
        let table = users();
        assert!(matches!(
            table.find_by("missing", &json!("x")),
            Err(StoreError::UnknownIndex { .. })
        ));
        assert!(matches!(
            table.find_by("by_email", &json!(true)),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_limit() {
        let table = users();
        numbered(&table);

        assert_eq!(ids(&table.limit(2, 0, Order::Asc).unwrap()), vec![1, 2]);
        assert_eq!(ids(&table.limit(2, 2, Order::Desc).unwrap()), vec![3, 2]);
        assert_eq!(ids(&table.limit(1, 0, Order::default()).unwrap()), vec![5]);
        assert_eq!(ids(&table.limit(10, 3, Order::Asc).unwrap()), vec![4, 5]);
        assert!(table.limit(2, 9, Order::Asc).unwrap().is_empty());
        assert!(table.limit(0, 0, Order::Asc).unwrap().is_empty());
    }

    #[test]
    fn test_filter_accumulates_all_matches() {
        let table = users();
        table
            .insert(
                json!([
                    {"id": 3, "role": "admin"},
                    {"id": 1, "role": "admin"},
                    {"id": 2, "role": "user"},
                    {"id": 4, "role": "admin"}
                ]),
                false,
            )
            .unwrap();

        let admins = table.filter(matching(json!({"role": "admin"}))).unwrap();
        assert_eq!(ids(&admins), vec![1, 3, 4]);

        let even = table
            .filter(|r| r["id"].as_i64().is_some_and(|id| id % 2 == 0))
            .unwrap();
        assert_eq!(ids(&even), vec![2, 4]);

        assert!(table.filter(|_| false).unwrap().is_empty());
    }

    #[test]
    fn test_clear_and_replace() {
        let table = users();
        numbered(&table);
        table.clear().unwrap();
        assert!(table.all().unwrap().is_empty());

        numbered(&table);
        table.replace(json!([{"id": 9}, {"id": 8}])).unwrap();
        assert_eq!(ids(&table.all().unwrap()), vec![8, 9]);
    }

    #[test]
    fn test_get_delete_count() {
        let table = users();
        numbered(&table);
        assert_eq!(table.count().unwrap(), 5);
        assert_eq!(table.get(&Key::from(3)).unwrap(), Some(json!({"id": 3})));
        assert!(table.delete(&Key::from(3)).unwrap());
        assert!(!table.delete(&Key::from(3)).unwrap());
        assert_eq!(table.get(&Key::from(3)).unwrap(), None);
        assert_eq!(table.count().unwrap(), 4);
    }

    #[test]
    fn test_unknown_table() {
        let settings = Settings::default();
        let connections = ConnectionManager::new(MemoryEngine::new(), settings).unwrap();
        let table = TableAccessor::new("nope", connections);
        assert!(matches!(table.all(), Err(StoreError::UnknownTable(_))));
        assert!(matches!(
            table.insert(json!({"id": 1}), false),
            Err(StoreError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_order_from_str() {
        assert_eq!("ASC".parse::<Order>().unwrap(), Order::Asc);
        assert_eq!("desc".parse::<Order>().unwrap(), Order::Desc);
        assert!("sideways".parse::<Order>().is_err());
    }
}
