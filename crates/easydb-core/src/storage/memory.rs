//! In-memory storage engine
//!
//! A BTreeMap-based engine for testing and development. Databases live as long
//! as the engine (or a clone of it) does.
//!
//! Tables are shared copy-on-write: a read transaction takes a snapshot of the
//! tables it names, a write transaction edits private copies and publishes
//! them on commit. Write transactions on one database are serialized, so a
//! thread must not hold a write transaction while starting another on the same
//! database.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::key::{Key, KeyPath};
use crate::record::Record;
use crate::schema::IndexDefinition;
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::traits::{
    Connection, Cursor, Direction, SchemaEditor, StorageEngine, Transaction, TransactionMode,
    UpgradeFn,
};

/// In-memory storage engine.
///
/// Cloning the engine shares its databases.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    databases: Arc<Mutex<HashMap<String, Arc<MemoryDatabase>>>>,
}

impl MemoryEngine {
    /// Create a new engine with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the databases currently held, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Default)]
struct MemoryDatabase {
    state: RwLock<DatabaseState>,
    writer: Mutex<()>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    version: u32,
    tables: BTreeMap<String, Arc<TableState>>,
}

#[derive(Debug, Clone)]
struct TableState {
    key_path: KeyPath,
    records: BTreeMap<Key, Record>,
    indexes: BTreeMap<String, IndexState>,
}

#[derive(Debug, Clone)]
struct IndexState {
    key_path: KeyPath,
    unique: bool,
    /// index key -> primary keys of the records holding it
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl TableState {
    fn new(key_path: KeyPath) -> Self {
        Self {
            key_path,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    fn write(&mut self, table: &str, record: &Record, overwrite: bool) -> StoreResult<Key> {
        let key = self.key_path.extract(record).ok_or_else(|| {
            StoreError::InvalidKey(format!(
                "record has no valid key at '{}' in table '{}'",
                self.key_path, table
            ))
        })?;

        if !overwrite && self.records.contains_key(&key) {
            return Err(StoreError::Constraint(format!(
                "key {} already exists in table '{}'",
                key, table
            )));
        }

        for (name, index) in &self.indexes {
            if !index.unique {
                continue;
            }
            if let Some(index_key) = index.key_path.extract(record) {
                let taken = index
                    .entries
                    .get(&index_key)
                    .is_some_and(|owners| owners.iter().any(|owner| owner != &key));
                if taken {
                    return Err(StoreError::Constraint(format!(
                        "value {} already exists in unique index '{}' of table '{}'",
                        index_key, name, table
                    )));
                }
            }
        }

        self.unindex(&key);
        for index in self.indexes.values_mut() {
            index.insert(record, &key);
        }
        self.records.insert(key.clone(), record.clone());

        Ok(key)
    }

    fn delete(&mut self, key: &Key) -> bool {
        self.unindex(key);
        self.records.remove(key).is_some()
    }

    fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    /// Drop the index entries of the record currently stored under `key`.
    fn unindex(&mut self, key: &Key) {
        let Some(old) = self.records.get(key) else {
            return;
        };
        for index in self.indexes.values_mut() {
            if let Some(index_key) = index.key_path.extract(old) {
                if let Some(owners) = index.entries.get_mut(&index_key) {
                    owners.remove(key);
                    if owners.is_empty() {
                        index.entries.remove(&index_key);
                    }
                }
            }
        }
    }

    fn create_index(&mut self, table: &str, definition: &IndexDefinition) -> StoreResult<()> {
        if self.indexes.contains_key(&definition.name) {
            return Err(StoreError::Schema(format!(
                "index '{}' already exists on table '{}'",
                definition.name, table
            )));
        }
        if !definition.key_path.is_valid() {
            return Err(StoreError::Schema(format!(
                "index '{}' on table '{}' has an invalid key path '{}'",
                definition.name, table, definition.key_path
            )));
        }

        let mut index = IndexState {
            key_path: definition.key_path.clone(),
            unique: definition.options.unique,
            entries: BTreeMap::new(),
        };
        for (key, record) in &self.records {
            if index.unique {
                if let Some(index_key) = index.key_path.extract(record) {
                    if index.entries.contains_key(&index_key) {
                        return Err(StoreError::Constraint(format!(
                            "cannot build unique index '{}' on table '{}': duplicate value {}",
                            definition.name, table, index_key
                        )));
                    }
                }
            }
            index.insert(record, key);
        }

        self.indexes.insert(definition.name.clone(), index);
        Ok(())
    }
}

impl IndexState {
    fn insert(&mut self, record: &Record, key: &Key) {
        if let Some(index_key) = self.key_path.extract(record) {
            self.entries.entry(index_key).or_default().insert(key.clone());
        }
    }
}

impl StorageEngine for MemoryEngine {
    type Connection = MemoryConnection;

    fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> StoreResult<MemoryConnection> {
        if version == 0 {
            return Err(StoreError::Connection(format!(
                "cannot open '{}' at version 0",
                name
            )));
        }

        let database = Arc::clone(self.databases.lock().entry(name.to_string()).or_default());

        if database.state.read().version < version {
            let _writer = database.writer.lock();
            let current = database.state.read().version;
            if current < version {
                let mut editor = MemorySchemaEditor {
                    tables: database.state.read().tables.clone(),
                };
                debug!(database = name, from = current, to = version, "upgrading in-memory database");
                upgrade(&mut editor, current)?;

                let mut state = database.state.write();
                state.tables = editor.tables;
                state.version = version;
            }
        }

        let current = database.state.read().version;
        if current > version {
            return Err(StoreError::Version {
                name: name.to_string(),
                current,
                requested: version,
            });
        }

        Ok(MemoryConnection {
            name: name.to_string(),
            version,
            database,
        })
    }

    fn delete_database(&self, name: &str) -> StoreResult<()> {
        if self.databases.lock().remove(name).is_some() {
            debug!(database = name, "deleted in-memory database");
        }
        Ok(())
    }
}

struct MemorySchemaEditor {
    tables: BTreeMap<String, Arc<TableState>>,
}

impl SchemaEditor for MemorySchemaEditor {
    fn table_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn create_table(&mut self, name: &str, key_path: &KeyPath) -> StoreResult<()> {
        if self.tables.contains_key(name) {
            return Err(StoreError::Schema(format!("table '{}' already exists", name)));
        }
        if !key_path.is_valid() {
            return Err(StoreError::Schema(format!(
                "table '{}' has an invalid key path '{}'",
                name, key_path
            )));
        }
        self.tables
            .insert(name.to_string(), Arc::new(TableState::new(key_path.clone())));
        Ok(())
    }

    fn delete_table(&mut self, name: &str) -> StoreResult<()> {
        self.tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn create_index(&mut self, table: &str, index: &IndexDefinition) -> StoreResult<()> {
        let state = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Arc::make_mut(state).create_index(table, index)
    }

    fn index_names(&self, table: &str) -> StoreResult<Vec<String>> {
        let state = self
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(state.indexes.keys().cloned().collect())
    }
}

/// Connection to an in-memory database.
#[derive(Debug)]
pub struct MemoryConnection {
    name: String,
    version: u32,
    database: Arc<MemoryDatabase>,
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn table_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.database.state.read().tables.keys().cloned().collect())
    }

    fn transaction(
        &mut self,
        tables: &[&str],
        mode: TransactionMode,
    ) -> StoreResult<Box<dyn Transaction + '_>> {
        let writer = match mode {
            TransactionMode::ReadWrite => Some(self.database.writer.lock()),
            TransactionMode::ReadOnly => None,
        };

        let state = self.database.state.read();
        let mut scope = BTreeMap::new();
        for &table in tables {
            let snapshot = state
                .tables
                .get(table)
                .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
            scope.insert(table.to_string(), Arc::clone(snapshot));
        }
        drop(state);

        Ok(Box::new(MemoryTransaction {
            database: &self.database,
            _writer: writer,
            mode,
            tables: scope,
        }))
    }
}

struct MemoryTransaction<'a> {
    database: &'a MemoryDatabase,
    _writer: Option<MutexGuard<'a, ()>>,
    mode: TransactionMode,
    tables: BTreeMap<String, Arc<TableState>>,
}

impl MemoryTransaction<'_> {
    fn table(&self, name: &str) -> StoreResult<&TableState> {
        self.tables
            .get(name)
            .map(Arc::as_ref)
            .ok_or_else(|| out_of_scope(name))
    }

    fn table_mut(&mut self, name: &str) -> StoreResult<&mut TableState> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        self.tables
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| out_of_scope(name))
    }
}

fn out_of_scope(table: &str) -> StoreError {
    StoreError::Transaction(format!("table '{}' is not part of this transaction", table))
}

impl Transaction for MemoryTransaction<'_> {
    fn add(&mut self, table: &str, record: &Record) -> StoreResult<Key> {
        self.table_mut(table)?.write(table, record, false)
    }

    fn put(&mut self, table: &str, record: &Record) -> StoreResult<Key> {
        self.table_mut(table)?.write(table, record, true)
    }

    fn get(&self, table: &str, key: &Key) -> StoreResult<Option<Record>> {
        Ok(self.table(table)?.records.get(key).cloned())
    }

    fn delete(&mut self, table: &str, key: &Key) -> StoreResult<bool> {
        Ok(self.table_mut(table)?.delete(key))
    }

    fn clear(&mut self, table: &str) -> StoreResult<()> {
        self.table_mut(table)?.clear();
        Ok(())
    }

    fn count(&self, table: &str) -> StoreResult<usize> {
        Ok(self.table(table)?.records.len())
    }

    fn open_cursor(&self, table: &str, direction: Direction) -> StoreResult<Box<dyn Cursor + '_>> {
        let records = &self.table(table)?.records;
        let values: Box<dyn Iterator<Item = &Record> + '_> = match direction {
            Direction::Next => Box::new(records.values()),
            Direction::Prev => Box::new(records.values().rev()),
        };
        Ok(Box::new(MemoryCursor::new(values)))
    }

    fn open_index_cursor(
        &self,
        table: &str,
        index: &str,
        key: &Key,
        direction: Direction,
    ) -> StoreResult<Box<dyn Cursor + '_>> {
        let state = self.table(table)?;
        let owners = state
            .indexes
            .get(index)
            .ok_or_else(|| StoreError::UnknownIndex {
                table: table.to_string(),
                index: index.to_string(),
            })?
            .entries
            .get(key);

        let primary_keys: Box<dyn Iterator<Item = &Key> + '_> = match direction {
            Direction::Next => Box::new(owners.into_iter().flatten()),
            Direction::Prev => Box::new(owners.into_iter().flat_map(|keys| keys.iter().rev())),
        };
        let values = primary_keys.filter_map(move |pk| state.records.get(pk));
        Ok(Box::new(MemoryCursor::new(Box::new(values))))
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        if this.mode == TransactionMode::ReadWrite {
            let mut state = this.database.state.write();
            for (name, table) in this.tables {
                state.tables.insert(name, table);
            }
        }
        Ok(())
    }
}

struct MemoryCursor<'a> {
    records: Box<dyn Iterator<Item = &'a Record> + 'a>,
    current: Option<&'a Record>,
}

impl<'a> MemoryCursor<'a> {
    fn new(mut records: Box<dyn Iterator<Item = &'a Record> + 'a>) -> Self {
        let current = records.next();
        Self { records, current }
    }
}

impl Cursor for MemoryCursor<'_> {
    fn value(&self) -> Option<&Record> {
        self.current
    }

    fn advance(&mut self) -> StoreResult<()> {
        self.current = self.records.next();
        Ok(())
    }
}
