//! Async database facade.
//!
//! [`EasyDb`] owns the settings and the engine. [`Table`] handles run each
//! operation on tokio's blocking pool, so callers on the async runtime never
//! block on storage work.

use easydb_core::storage::{StorageEngine, StoreResult};
use easydb_core::{ConnectionManager, Key, Order, Record, Records, Settings, TableAccessor};
use serde_json::Value;
use tokio::task::spawn_blocking;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::tracing::prefix;

/// Run engine work on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    match spawn_blocking(f).await {
        Ok(result) => Ok(result?),
        Err(e) => {
            error!(error = %e, "storage task failed");
            Err(Error::Task(e.to_string()))
        }
    }
}

/// An EasyDB database: settings plus the engine that stores it.
pub struct EasyDb<E> {
    connections: ConnectionManager<E>,
}

impl<E> Clone for EasyDb<E> {
    fn clone(&self) -> Self {
        Self {
            connections: self.connections.clone(),
        }
    }
}

impl<E> EasyDb<E>
where
    E: StorageEngine + Send + Sync + 'static,
{
    /// Validate `settings` (or fall back to [`Settings::default`]) and open the
    /// database once, so any pending schema upgrade runs before this returns.
    pub async fn new(engine: E, settings: Option<Settings>) -> Result<Self> {
        let settings = settings.unwrap_or_default();
        let connections = ConnectionManager::new(engine, settings)?;

        let probe = connections.clone();
        run_blocking(move || probe.open().map(drop)).await?;

        let connection = &connections.settings().connection;
        info!(
            "{} Opened {} v{}",
            prefix::DB,
            connection.name,
            connection.version
        );
        Ok(Self { connections })
    }

    /// Open with the built-in single-table settings.
    pub async fn with_default_settings(engine: E) -> Result<Self> {
        Self::new(engine, None).await
    }

    pub fn settings(&self) -> &Settings {
        self.connections.settings()
    }

    /// A handle on one table. Nothing is checked until an operation runs.
    pub fn open(&self, table: &str) -> Table<E> {
        Table {
            accessor: TableAccessor::new(table, self.connections.clone()),
        }
    }

    /// Same as [`EasyDb::open`].
    pub fn get(&self, table: &str) -> Table<E> {
        self.open(table)
    }

    /// Remove every record from `table`.
    pub async fn clear(&self, table: &str) -> Result<()> {
        self.open(table).clear().await
    }

    /// Delete the whole database.
    pub async fn delete(self) -> Result<()> {
        let name = self.connections.settings().connection.name.clone();
        let connections = self.connections;
        run_blocking(move || connections.delete_database()).await?;
        info!("{} Deleted {}", prefix::DB, name);
        Ok(())
    }
}

/// Async operations on one table.
pub struct Table<E> {
    accessor: TableAccessor<E>,
}

impl<E> Clone for Table<E> {
    fn clone(&self) -> Self {
        Self {
            accessor: self.accessor.clone(),
        }
    }
}

impl<E> Table<E>
where
    E: StorageEngine + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        self.accessor.name()
    }

    /// Every record in ascending primary-key order.
    pub async fn all(&self) -> Result<Vec<Record>> {
        let table = self.accessor.clone();
        run_blocking(move || table.all()).await
    }

    /// Records whose `index` key equals `value`, in primary-key order.
    pub async fn find_by(&self, index: &str, value: &Value) -> Result<Vec<Record>> {
        let table = self.accessor.clone();
        let (index, value) = (index.to_string(), value.clone());
        run_blocking(move || table.find_by(&index, &value)).await
    }

    /// The first record (by primary key) whose `index` key equals `value`.
    pub async fn find_one_by(&self, index: &str, value: &Value) -> Result<Option<Record>> {
        let table = self.accessor.clone();
        let (index, value) = (index.to_string(), value.clone());
        run_blocking(move || table.find_one_by(&index, &value)).await
    }

    /// Up to `count` records after skipping `offset`, in `order`.
    pub async fn limit(&self, count: usize, offset: usize, order: Order) -> Result<Vec<Record>> {
        let table = self.accessor.clone();
        run_blocking(move || table.limit(count, offset, order)).await
    }

    /// Every record satisfying `predicate`, in primary-key order.
    #[doc(alias = "where")]
    pub async fn filter<P>(&self, predicate: P) -> Result<Vec<Record>>
    where
        P: Fn(&Record) -> bool + Send + 'static,
    {
        let table = self.accessor.clone();
        run_blocking(move || table.filter(predicate)).await
    }

    /// Insert one record or a batch; see [`TableAccessor::insert`].
    pub async fn insert(&self, data: impl Into<Records>, overwrite: bool) -> Result<Vec<Key>> {
        let table = self.accessor.clone();
        let records = data.into();
        run_blocking(move || table.insert(records, overwrite)).await
    }

    /// Upsert one record or a batch.
    pub async fn update(&self, data: impl Into<Records>) -> Result<Vec<Key>> {
        self.insert(data, true).await
    }

    /// Replace the table's contents in one transaction.
    pub async fn replace(&self, data: impl Into<Records>) -> Result<Vec<Key>> {
        let table = self.accessor.clone();
        let records = data.into();
        run_blocking(move || table.replace(records)).await
    }

    pub async fn clear(&self) -> Result<()> {
        let table = self.accessor.clone();
        run_blocking(move || table.clear()).await
    }

    pub async fn get(&self, key: impl Into<Key>) -> Result<Option<Record>> {
        let table = self.accessor.clone();
        let key = key.into();
        run_blocking(move || table.get(&key)).await
    }

    /// Returns `true` if a record was deleted.
    pub async fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        let table = self.accessor.clone();
        let key = key.into();
        run_blocking(move || table.delete(&key)).await
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.accessor.clone();
        run_blocking(move || table.count()).await
    }
}
