//! IndexedDB database and table handles.
//!
//! Because IndexedDB is inherently async, the methods here are async
//! equivalents of the synchronous `TableAccessor` operations from
//! `easydb-core`. Same names, same inputs, same outputs, same errors.

use easydb_core::storage::{StoreError, StoreResult};
use easydb_core::{Key, Order, Record, Records, Settings};
use tracing::{debug, error};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    IdbCursorDirection, IdbCursorWithValue, IdbDatabase, IdbObjectStore, IdbRequest,
    IdbTransaction, IdbTransactionMode,
};

use crate::error::IndexedDbError;
use crate::idb;
use crate::js::{js_to_key, js_to_record, js_to_records, key_to_js, record_to_js};

/// An open IndexedDB database with its declared schema applied.
pub struct IndexedDb {
    db: IdbDatabase,
    settings: Settings,
}

impl IndexedDb {
    /// Open (or create and upgrade) the database described by `settings`.
    pub async fn open(settings: Settings) -> StoreResult<Self> {
        settings.validate()?;
        let db = idb::open_database(&settings).await?;
        debug!(
            database = %settings.connection.name,
            version = settings.connection.version,
            "opened indexeddb database"
        );
        Ok(Self { db, settings })
    }

    /// Open with the default settings (`easy_db` v1, `sample_table`).
    pub async fn open_default() -> StoreResult<Self> {
        Self::open(Settings::default()).await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// A handle on one table. Nothing is checked until an operation runs.
    pub fn table(&self, name: &str) -> IdbTable<'_> {
        IdbTable {
            db: &self.db,
            database: &self.settings.connection.name,
            name: name.to_string(),
        }
    }

    /// Same as [`IndexedDb::table`]; `open` is taken by the constructor.
    pub fn get(&self, name: &str) -> IdbTable<'_> {
        self.table(name)
    }

    /// Remove every record from `table`.
    pub async fn clear(&self, table: &str) -> StoreResult<()> {
        self.table(table).clear().await
    }

    /// Close the database connection.
    pub fn close(&self) {
        self.db.close();
    }

    /// Close the connection and delete the whole database.
    pub async fn delete(self) -> StoreResult<()> {
        self.db.close();
        Self::delete_database(&self.settings.connection.name).await
    }

    /// Delete a database by name.
    pub async fn delete_database(name: &str) -> StoreResult<()> {
        idb::delete_database(name).await?;
        debug!(database = name, "deleted indexeddb database");
        Ok(())
    }
}

/// Async operations on one IndexedDB object store.
pub struct IdbTable<'a> {
    db: &'a IdbDatabase,
    database: &'a str,
    name: String,
}

impl IdbTable<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every record in ascending primary-key order.
    pub async fn all(&self) -> StoreResult<Vec<Record>> {
        let result = self.read_all().await;
        self.report("all", result)
    }

    /// Records whose `index` key equals `value`, in primary-key order.
    pub async fn find_by(&self, index: &str, value: &serde_json::Value) -> StoreResult<Vec<Record>> {
        let result = self.read_index(index, value, false).await;
        self.report("find_by", result)
    }

    /// The first record (by primary key) whose `index` key equals `value`.
    pub async fn find_one_by(
        &self,
        index: &str,
        value: &serde_json::Value,
    ) -> StoreResult<Option<Record>> {
        let result = self
            .read_index(index, value, true)
            .await
            .map(|records| records.into_iter().next());
        self.report("find_one_by", result)
    }

    /// Up to `count` records after skipping `offset`, walking the primary key
    /// in `order`.
    pub async fn limit(&self, count: usize, offset: usize, order: Order) -> StoreResult<Vec<Record>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let direction = match order {
            Order::Asc => IdbCursorDirection::Next,
            Order::Desc => IdbCursorDirection::Prev,
        };
        let result = self.walk(direction, offset, count, &keep_all).await;
        self.report("limit", result)
    }

    /// Every record satisfying `predicate`, in primary-key order.
    #[doc(alias = "where")]
    pub async fn filter<P>(&self, predicate: P) -> StoreResult<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        let result = self
            .walk(IdbCursorDirection::Next, 0, usize::MAX, &predicate)
            .await;
        self.report("filter", result)
    }

    pub async fn get(&self, key: &Key) -> StoreResult<Option<Record>> {
        let result = self.read_one(key).await;
        self.report("get", result)
    }

    pub async fn count(&self) -> StoreResult<usize> {
        let result = self.read_count().await;
        self.report("count", result)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert one record or a batch in one transaction.
    ///
    /// With `overwrite` false an existing primary key fails the whole batch
    /// with `StoreError::Constraint`; with `overwrite` true records are upserted.
    pub async fn insert(&self, data: impl Into<Records>, overwrite: bool) -> StoreResult<Vec<Key>> {
        let records = data.into();
        let result = self.write(&records, overwrite, false).await;
        self.report("insert", result)
    }

    /// Upsert one record or a batch. Same as `insert(data, true)`.
    pub async fn update(&self, data: impl Into<Records>) -> StoreResult<Vec<Key>> {
        self.insert(data, true).await
    }

    /// Replace the table's contents with `data` in one transaction.
    pub async fn replace(&self, data: impl Into<Records>) -> StoreResult<Vec<Key>> {
        let records = data.into();
        let result = self.write(&records, false, true).await;
        self.report("replace", result)
    }

    /// Delete the record stored under `key`. Returns `true` if one existed.
    pub async fn delete(&self, key: &Key) -> StoreResult<bool> {
        let result = self.remove(key).await;
        self.report("delete", result)
    }

    /// Remove every record.
    pub async fn clear(&self) -> StoreResult<()> {
        let result = self.remove_all().await;
        self.report("clear", result)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn begin(&self, mode: IdbTransactionMode) -> StoreResult<(IdbTransaction, IdbObjectStore)> {
        if !self.db.object_store_names().contains(&self.name) {
            return Err(StoreError::UnknownTable(self.name.clone()));
        }
        Ok(idb::begin_transaction(self.db, &self.name, mode)?)
    }

    async fn read_all(&self) -> StoreResult<Vec<Record>> {
        let (tx, store) = self.begin(IdbTransactionMode::Readonly)?;
        let req = store.get_all().map_err(IndexedDbError::from)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;
        Ok(js_to_records(&result)?)
    }

    async fn read_index(
        &self,
        index: &str,
        value: &serde_json::Value,
        first_only: bool,
    ) -> StoreResult<Vec<Record>> {
        let key = Key::from_value(value)
            .ok_or_else(|| StoreError::InvalidKey(format!("{} is not a valid key", value)))?;
        let (tx, store) = self.begin(IdbTransactionMode::Readonly)?;
        let idx = store.index(index).map_err(|_| StoreError::UnknownIndex {
            table: self.name.clone(),
            index: index.to_string(),
        })?;

        let key = key_to_js(&key);
        let req = if first_only {
            idx.get(&key)
        } else {
            idx.get_all_with_key(&key)
        }
        .map_err(IndexedDbError::from)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;

        if first_only {
            if result.is_undefined() || result.is_null() {
                return Ok(Vec::new());
            }
            return Ok(vec![js_to_record(&result)?]);
        }
        Ok(js_to_records(&result)?)
    }

    /// Walk a cursor, skipping `offset` records and keeping those accepted by
    /// `keep` until `limit` are collected.
    async fn walk(
        &self,
        direction: IdbCursorDirection,
        offset: usize,
        limit: usize,
        keep: &dyn Fn(&Record) -> bool,
    ) -> StoreResult<Vec<Record>> {
        let (tx, store) = self.begin(IdbTransactionMode::Readonly)?;
        let req = store
            .open_cursor_with_range_and_direction(&JsValue::NULL, direction)
            .map_err(IndexedDbError::from)?;

        let mut records = Vec::new();
        let mut skip = offset;
        while records.len() < limit {
            let result = idb::await_request(&req).await?;
            if result.is_undefined() || result.is_null() {
                break;
            }
            let cursor: IdbCursorWithValue = result.unchecked_into();

            if skip > 0 {
                let step = u32::try_from(skip).unwrap_or(u32::MAX);
                cursor.advance(step).map_err(IndexedDbError::from)?;
                skip -= step as usize;
                continue;
            }

            let record = js_to_record(&cursor.value().map_err(IndexedDbError::from)?)?;
            if keep(&record) {
                records.push(record);
                if records.len() == limit {
                    break;
                }
            }
            cursor.continue_().map_err(IndexedDbError::from)?;
        }

        idb::await_transaction(&tx).await?;
        Ok(records)
    }

    async fn read_one(&self, key: &Key) -> StoreResult<Option<Record>> {
        let (tx, store) = self.begin(IdbTransactionMode::Readonly)?;
        let req = store.get(&key_to_js(key)).map_err(IndexedDbError::from)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;

        if result.is_undefined() || result.is_null() {
            return Ok(None);
        }
        Ok(Some(js_to_record(&result)?))
    }

    async fn read_count(&self) -> StoreResult<usize> {
        let (tx, store) = self.begin(IdbTransactionMode::Readonly)?;
        let req = store.count().map_err(IndexedDbError::from)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;
        Ok(result.as_f64().unwrap_or(0.0) as usize)
    }

    async fn write(&self, records: &Records, overwrite: bool, clear_first: bool) -> StoreResult<Vec<Key>> {
        let (tx, store) = self.begin(IdbTransactionMode::Readwrite)?;

        let requests = match stage(&store, records, overwrite, clear_first) {
            Ok(requests) => requests,
            Err(e) => {
                let _ = tx.abort();
                return Err(e);
            }
        };
        idb::await_transaction(&tx).await?;

        requests
            .iter()
            .map(|req| -> StoreResult<Key> {
                let key = req.result().map_err(IndexedDbError::from)?;
                Ok(js_to_key(&key)?)
            })
            .collect()
    }

    async fn remove(&self, key: &Key) -> StoreResult<bool> {
        let (tx, store) = self.begin(IdbTransactionMode::Readwrite)?;
        let key = key_to_js(key);
        let counted = store.count_with_key(&key).map_err(IndexedDbError::from)?;
        store.delete(&key).map_err(IndexedDbError::from)?;
        idb::await_transaction(&tx).await?;

        let existed = counted
            .result()
            .map_err(IndexedDbError::from)?
            .as_f64()
            .unwrap_or(0.0);
        Ok(existed > 0.0)
    }

    async fn remove_all(&self) -> StoreResult<()> {
        let (tx, store) = self.begin(IdbTransactionMode::Readwrite)?;
        store.clear().map_err(IndexedDbError::from)?;
        idb::await_transaction(&tx).await?;
        Ok(())
    }

    fn report<T>(&self, op: &'static str, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(e) = &result {
            error!(
                database = %self.database,
                table = %self.name,
                op,
                error = %e,
                "table operation failed"
            );
        }
        result
    }
}

fn keep_all(_: &Record) -> bool {
    true
}

/// Issue every write request. Requests run when control returns to the
/// browser; a synchronous failure (bad key, unclonable value) is returned
/// here and the caller aborts the transaction.
fn stage(
    store: &IdbObjectStore,
    records: &Records,
    overwrite: bool,
    clear_first: bool,
) -> StoreResult<Vec<IdbRequest>> {
    if clear_first {
        store.clear().map_err(IndexedDbError::from)?;
    }
    records
        .iter()
        .map(|record| -> StoreResult<IdbRequest> {
            let value = record_to_js(record)?;
            let req = if overwrite {
                store.put(&value)
            } else {
                store.add(&value)
            };
            Ok(req.map_err(IndexedDbError::from)?)
        })
        .collect()
}
