//! SQLite storage engine implementing the EasyDB engine traits
//!
//! Each logical database is one SQLite database: a file under the engine's
//! directory, or a private in-memory database. All tables share the catalog
//! created by [`crate::migrate`]; records are stored under the order-preserving
//! encoding of their primary key so SQLite's BLOB ordering is key ordering.
//!
//! The engine keeps one SQLite connection per logical database and hands out
//! [`SqliteConnection`]s sharing it. A transaction holds the connection lock
//! until it commits or is dropped, which serializes transactions per database.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use easydb_core::schema::IndexDefinition;
use easydb_core::storage::{
    Connection as EngineConnection, Cursor, Direction, SchemaEditor, StorageEngine, StoreError,
    StoreResult, Transaction, TransactionMode, UpgradeFn,
};
use easydb_core::{Key, KeyPath, Record};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::{Result, SqliteError};
use crate::migrate::migrate;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where an engine keeps its databases.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    /// Private in-memory databases, gone when the engine is dropped
    Memory,
    /// One `<name>.sqlite3` file per database inside this directory
    Directory(PathBuf),
}

/// SQLite-backed storage engine
pub struct SqliteEngine {
    location: Location,
    handles: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl SqliteEngine {
    /// Create an engine whose databases live in memory (for testing)
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Create an engine storing database files in `dir`, creating it if needed
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            location: Location::Directory(dir),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// The file backing database `name`, if the engine is file-backed
    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        match &self.location {
            Location::Memory => None,
            Location::Directory(dir) => Some(dir.join(file_name(name))),
        }
    }

    fn handle(&self, name: &str) -> Result<Arc<Mutex<Connection>>> {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(name) {
            return Ok(Arc::clone(handle));
        }

        let conn = match self.path_for(name) {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrate(&conn)?;
        debug!(database = name, location = ?self.location, "opened sqlite database");

        let handle = Arc::new(Mutex::new(conn));
        handles.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }
}

/// Map a database name to a file name, replacing anything outside
/// `[A-Za-z0-9_-]`.
fn file_name(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.sqlite3", stem)
}

impl StorageEngine for SqliteEngine {
    type Connection = SqliteConnection;

    fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut UpgradeFn<'_>,
    ) -> StoreResult<SqliteConnection> {
        if version == 0 {
            return Err(StoreError::Connection(format!(
                "cannot open '{}' at version 0",
                name
            )));
        }

        let handle = self.handle(name)?;
        {
            let conn = handle.lock();
            let current = read_version(&conn)?;
            if current > version {
                return Err(StoreError::Version {
                    name: name.to_string(),
                    current,
                    requested: version,
                });
            }
            if current < version {
                debug!(database = name, from = current, to = version, "upgrading sqlite database");
                run_upgrade(&conn, current, version, upgrade)?;
            }
        }

        Ok(SqliteConnection {
            name: name.to_string(),
            version,
            handle,
        })
    }

    fn delete_database(&self, name: &str) -> StoreResult<()> {
        drop(self.handles.lock().remove(name));

        if let Some(path) = self.path_for(name) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(database = name, path = %path.display(), "deleted sqlite database"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SqliteError::from(e).into()),
            }
        }
        Ok(())
    }
}

/// Run `upgrade` and bump the stored version in one SQLite transaction.
fn run_upgrade(
    conn: &Connection,
    current: u32,
    version: u32,
    upgrade: &mut UpgradeFn<'_>,
) -> StoreResult<()> {
    let tx = conn.unchecked_transaction().map_err(SqliteError::from)?;
    let mut editor = SqliteSchemaEditor { conn: &tx };
    upgrade(&mut editor, current)?;
    write_version(&tx, version)?;
    tx.commit().map_err(SqliteError::from)?;
    Ok(())
}

fn read_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row(
            "SELECT value FROM easydb_meta WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn write_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO easydb_meta (key, value) VALUES ('version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [version],
    )?;
    Ok(())
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone)]
struct TableMeta {
    key_path: KeyPath,
    indexes: Vec<IndexMeta>,
}

#[derive(Debug, Clone)]
struct IndexMeta {
    name: String,
    key_path: KeyPath,
    unique: bool,
}

impl TableMeta {
    fn index(&self, name: &str) -> Option<&IndexMeta> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

fn load_table(conn: &Connection, name: &str) -> Result<Option<TableMeta>> {
    let key_path: Option<String> = conn
        .query_row(
            "SELECT key_path FROM easydb_tables WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    let Some(key_path) = key_path else {
        return Ok(None);
    };

    let mut stmt = conn.prepare_cached(
        "SELECT name, key_path, is_unique FROM easydb_indexes WHERE table_name = ?1 ORDER BY name",
    )?;
    let rows = stmt.query_map([name], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, bool>(2)?,
        ))
    })?;

    let mut indexes = Vec::new();
    for row in rows {
        let (name, key_path, unique) = row?;
        indexes.push(IndexMeta {
            name,
            key_path: serde_json::from_str(&key_path)?,
            unique,
        });
    }

    Ok(Some(TableMeta {
        key_path: serde_json::from_str(&key_path)?,
        indexes,
    }))
}

fn require_table(conn: &Connection, name: &str) -> Result<TableMeta> {
    load_table(conn, name)?.ok_or_else(|| StoreError::UnknownTable(name.to_string()).into())
}

struct SqliteSchemaEditor<'a> {
    conn: &'a Connection,
}

impl SqliteSchemaEditor<'_> {
    fn add_table(&self, name: &str, key_path: &KeyPath) -> Result<()> {
        if load_table(self.conn, name)?.is_some() {
            return Err(StoreError::Schema(format!("table '{}' already exists", name)).into());
        }
        if !key_path.is_valid() {
            return Err(StoreError::Schema(format!(
                "table '{}' has an invalid key path '{}'",
                name, key_path
            ))
            .into());
        }
        self.conn.execute(
            "INSERT INTO easydb_tables (name, key_path) VALUES (?1, ?2)",
            params![name, serde_json::to_string(key_path)?],
        )?;
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        require_table(self.conn, name)?;
        self.conn.execute(
            "DELETE FROM easydb_index_entries WHERE table_name = ?1",
            [name],
        )?;
        self.conn
            .execute("DELETE FROM easydb_indexes WHERE table_name = ?1", [name])?;
        self.conn
            .execute("DELETE FROM easydb_records WHERE table_name = ?1", [name])?;
        self.conn
            .execute("DELETE FROM easydb_tables WHERE name = ?1", [name])?;
        Ok(())
    }

    fn add_index(&self, table: &str, index: &IndexDefinition) -> Result<()> {
        let meta = require_table(self.conn, table)?;
        if meta.index(&index.name).is_some() {
            return Err(StoreError::Schema(format!(
                "index '{}' already exists on table '{}'",
                index.name, table
            ))
            .into());
        }
        if !index.key_path.is_valid() {
            return Err(StoreError::Schema(format!(
                "index '{}' on table '{}' has an invalid key path '{}'",
                index.name, table, index.key_path
            ))
            .into());
        }

        self.conn.execute(
            "INSERT INTO easydb_indexes (table_name, name, key_path, is_unique) VALUES (?1, ?2, ?3, ?4)",
            params![
                table,
                index.name,
                serde_json::to_string(&index.key_path)?,
                index.options.unique
            ],
        )?;

        // Populate from the records already in the table
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM easydb_records WHERE table_name = ?1")?;
        let rows = stmt.query_map([table], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut seen = BTreeSet::new();
        let mut entries = Vec::new();
        for row in rows {
            let (record_key, value) = row?;
            let record: Record = serde_json::from_str(&value)?;
            let Some(index_key) = index.key_path.extract(&record) else {
                continue;
            };
            if index.options.unique && !seen.insert(index_key.clone()) {
                return Err(StoreError::Constraint(format!(
                    "cannot create unique index '{}' on table '{}': duplicate value {}",
                    index.name, table, index_key
                ))
                .into());
            }
            entries.push((index_key.encode(), record_key));
        }

        for (index_key, record_key) in entries {
            self.conn.execute(
                "INSERT INTO easydb_index_entries (table_name, index_name, index_key, record_key)
                 VALUES (?1, ?2, ?3, ?4)",
                params![table, index.name, index_key, record_key],
            )?;
        }
        Ok(())
    }
}

impl SchemaEditor for SqliteSchemaEditor<'_> {
    fn table_names(&self) -> StoreResult<Vec<String>> {
        Ok(table_names(self.conn)?)
    }

    fn create_table(&mut self, name: &str, key_path: &KeyPath) -> StoreResult<()> {
        Ok(self.add_table(name, key_path)?)
    }

    fn delete_table(&mut self, name: &str) -> StoreResult<()> {
        Ok(self.drop_table(name)?)
    }

    fn create_index(&mut self, table: &str, index: &IndexDefinition) -> StoreResult<()> {
        Ok(self.add_index(table, index)?)
    }

    fn index_names(&self, table: &str) -> StoreResult<Vec<String>> {
        let meta = require_table(self.conn, table)?;
        Ok(meta.indexes.into_iter().map(|index| index.name).collect())
    }
}

fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT name FROM easydb_tables ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

// ============================================================================
// Connections and transactions
// ============================================================================

/// Connection to one SQLite-backed database.
pub struct SqliteConnection {
    name: String,
    version: u32,
    handle: Arc<Mutex<Connection>>,
}

impl EngineConnection for SqliteConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn table_names(&self) -> StoreResult<Vec<String>> {
        Ok(table_names(&self.handle.lock())?)
    }

    fn transaction(
        &mut self,
        tables: &[&str],
        mode: TransactionMode,
    ) -> StoreResult<Box<dyn Transaction + '_>> {
        let conn = self.handle.lock();

        let mut scope = HashMap::new();
        for &table in tables {
            scope.insert(table.to_string(), require_table(&conn, table)?);
        }

        let begin = match mode {
            TransactionMode::ReadOnly => "BEGIN DEFERRED",
            TransactionMode::ReadWrite => "BEGIN IMMEDIATE",
        };
        conn.execute_batch(begin).map_err(SqliteError::from)?;

        Ok(Box::new(SqliteTransaction {
            conn,
            mode,
            tables: scope,
            finished: false,
        }))
    }
}

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    mode: TransactionMode,
    tables: HashMap<String, TableMeta>,
    finished: bool,
}

impl SqliteTransaction<'_> {
    fn meta(&self, table: &str) -> StoreResult<&TableMeta> {
        self.tables.get(table).ok_or_else(|| {
            StoreError::Transaction(format!("table '{}' is not part of this transaction", table))
        })
    }

    fn writable(&self, table: &str) -> StoreResult<&TableMeta> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        self.meta(table)
    }

    fn write(&self, table: &str, record: &Record, overwrite: bool) -> StoreResult<Key> {
        let meta = self.writable(table)?;
        Ok(write_record(&self.conn, table, meta, record, overwrite)?)
    }
}

fn write_record(
    conn: &Connection,
    table: &str,
    meta: &TableMeta,
    record: &Record,
    overwrite: bool,
) -> Result<Key> {
    let key = meta.key_path.extract(record).ok_or_else(|| {
        StoreError::InvalidKey(format!(
            "record has no valid key at '{}' for table '{}'",
            meta.key_path, table
        ))
    })?;
    let encoded = key.encode();

    let exists = conn
        .prepare_cached("SELECT 1 FROM easydb_records WHERE table_name = ?1 AND key = ?2")?
        .exists(params![table, encoded])?;
    if exists && !overwrite {
        return Err(StoreError::Constraint(format!(
            "key {} already exists in table '{}'",
            key, table
        ))
        .into());
    }

    // Check every unique index before touching anything
    let mut entries = Vec::new();
    for index in &meta.indexes {
        let Some(index_key) = index.key_path.extract(record) else {
            continue;
        };
        let index_key = index_key.encode();
        if index.unique {
            let taken = conn
                .prepare_cached(
                    "SELECT 1 FROM easydb_index_entries
                     WHERE table_name = ?1 AND index_name = ?2 AND index_key = ?3 AND record_key <> ?4",
                )?
                .exists(params![table, index.name, index_key, encoded])?;
            if taken {
                return Err(StoreError::Constraint(format!(
                    "unique index '{}' on table '{}' already holds this value",
                    index.name, table
                ))
                .into());
            }
        }
        entries.push((index.name.as_str(), index_key));
    }

    let value = serde_json::to_string(record)?;
    conn.execute(
        "DELETE FROM easydb_index_entries WHERE table_name = ?1 AND record_key = ?2",
        params![table, encoded],
    )?;
    conn.execute(
        "INSERT INTO easydb_records (table_name, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(table_name, key) DO UPDATE SET value = excluded.value",
        params![table, encoded, value],
    )?;
    for (index_name, index_key) in entries {
        conn.execute(
            "INSERT INTO easydb_index_entries (table_name, index_name, index_key, record_key)
             VALUES (?1, ?2, ?3, ?4)",
            params![table, index_name, index_key, encoded],
        )?;
    }

    Ok(key)
}

fn delete_record(conn: &Connection, table: &str, key: &Key) -> Result<bool> {
    let encoded = key.encode();
    conn.execute(
        "DELETE FROM easydb_index_entries WHERE table_name = ?1 AND record_key = ?2",
        params![table, encoded],
    )?;
    let deleted = conn.execute(
        "DELETE FROM easydb_records WHERE table_name = ?1 AND key = ?2",
        params![table, encoded],
    )?;
    Ok(deleted > 0)
}

fn clear_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM easydb_index_entries WHERE table_name = ?1",
        [table],
    )?;
    conn.execute("DELETE FROM easydb_records WHERE table_name = ?1", [table])?;
    Ok(())
}

fn get_record(conn: &Connection, table: &str, key: &Key) -> Result<Option<Record>> {
    let value: Option<String> = conn
        .prepare_cached("SELECT value FROM easydb_records WHERE table_name = ?1 AND key = ?2")?
        .query_row(params![table, key.encode()], |row| row.get(0))
        .optional()?;
    match value {
        Some(value) => Ok(Some(serde_json::from_str(&value)?)),
        None => Ok(None),
    }
}

fn count_records(conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM easydb_records WHERE table_name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

impl Transaction for SqliteTransaction<'_> {
    fn add(&mut self, table: &str, record: &Record) -> StoreResult<Key> {
        self.write(table, record, false)
    }

    fn put(&mut self, table: &str, record: &Record) -> StoreResult<Key> {
        self.write(table, record, true)
    }

    fn get(&self, table: &str, key: &Key) -> StoreResult<Option<Record>> {
        self.meta(table)?;
        Ok(get_record(&self.conn, table, key)?)
    }

    fn delete(&mut self, table: &str, key: &Key) -> StoreResult<bool> {
        self.writable(table)?;
        Ok(delete_record(&self.conn, table, key)?)
    }

    fn clear(&mut self, table: &str) -> StoreResult<()> {
        self.writable(table)?;
        Ok(clear_table(&self.conn, table)?)
    }

    fn count(&self, table: &str) -> StoreResult<usize> {
        self.meta(table)?;
        Ok(count_records(&self.conn, table)?)
    }

    fn open_cursor(&self, table: &str, direction: Direction) -> StoreResult<Box<dyn Cursor + '_>> {
        let meta = self.meta(table)?;
        let cursor = SqliteCursor::new(&self.conn, table, None, direction)?;
        Ok(Box::new(cursor))
    }

    fn open_index_cursor(
        &self,
        table: &str,
        index: &str,
        key: &Key,
        direction: Direction,
    ) -> StoreResult<Box<dyn Cursor + '_>> {
        if self.meta(table)?.index(index).is_none() {
            return Err(StoreError::UnknownIndex {
                table: table.to_string(),
                index: index.to_string(),
            });
        }
        let cursor = SqliteCursor::new(
            &self.conn,
            table,
            Some((index.to_string(), key.encode())),
            direction,
        )?;
        Ok(Box::new(cursor))
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = self;
        this.conn
            .execute_batch("COMMIT")
            .map_err(SqliteError::from)?;
        this.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "failed to roll back sqlite transaction");
            }
        }
    }
}

// ============================================================================
// Cursors
// ============================================================================

/// Keyset-paginated cursor: each step fetches the first row past the encoded
/// key of the current record.
struct SqliteCursor<'a> {
    conn: &'a Connection,
    table: String,
    index: Option<(String, Vec<u8>)>,
    direction: Direction,
    position: Option<Vec<u8>>,
    current: Option<Record>,
}

impl<'a> SqliteCursor<'a> {
    fn new(
        conn: &'a Connection,
        table: &str,
        index: Option<(String, Vec<u8>)>,
        direction: Direction,
    ) -> Result<Self> {
        let mut cursor = Self {
            conn,
            table: table.to_string(),
            index,
            direction,
            position: None,
            current: None,
        };
        cursor.fetch()?;
        Ok(cursor)
    }

    fn fetch(&mut self) -> Result<()> {
        let (cmp, order) = match self.direction {
            Direction::Next => (">", "ASC"),
            Direction::Prev => ("<", "DESC"),
        };
        let read_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(Vec<u8>, String)> {
            Ok((row.get(0)?, row.get(1)?))
        };

        let row = match &self.index {
            None => {
                let sql = format!(
                    "SELECT key, value FROM easydb_records
                     WHERE table_name = ?1 AND (?2 IS NULL OR key {cmp} ?2)
                     ORDER BY key {order} LIMIT 1"
                );
                self.conn
                    .prepare_cached(&sql)?
                    .query_row(params![self.table, self.position], read_row)
                    .optional()?
            }
            Some((index, index_key)) => {
                let sql = format!(
                    "SELECT r.key, r.value FROM easydb_index_entries e
                     JOIN easydb_records r ON r.table_name = e.table_name AND r.key = e.record_key
                     WHERE e.table_name = ?1 AND e.index_name = ?2 AND e.index_key = ?3
                       AND (?4 IS NULL OR e.record_key {cmp} ?4)
                     ORDER BY e.record_key {order} LIMIT 1"
                );
                self.conn
                    .prepare_cached(&sql)?
                    .query_row(
                        params![self.table, index, index_key, self.position],
                        read_row,
                    )
                    .optional()?
            }
        };

        match row {
            Some((raw_key, value)) => {
                self.current = Some(serde_json::from_str(&value)?);
                self.position = Some(raw_key);
            }
            None => self.current = None,
        }
        Ok(())
    }
}

impl Cursor for SqliteCursor<'_> {
    fn value(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> StoreResult<()> {
        if self.current.is_some() {
            self.fetch()?;
        }
        Ok(())
    }
}
