//! Schema declarations and the schema manager
//!
//! Settings are the explicit configuration handed to a database facade: which
//! database to open, at which version, and which tables and indexes it should
//! contain. [`apply_schema`] turns them into engine calls during an upgrade.
//!
//! Settings round-trip through JSON in the form:
//!
//! ```json
//! {
//!   "connection": ["easy_db", 1],
//!   "schema": [
//!     {
//!       "name": "users",
//!       "keyPath": "id",
//!       "indexes": [
//!         ["by_email", "email", {"unique": true}],
//!         {"name": "by_role", "keyPath": "role"}
//!       ]
//!     }
//!   ],
//!   "upgrade": "recreate"
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::key::KeyPath;
use crate::storage::{SchemaEditor, StoreError, StoreResult};

/// Index options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    #[serde(default)]
    pub unique: bool,
}

/// A secondary index over one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "IndexDefinitionRepr")]
pub struct IndexDefinition {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub options: IndexOptions,
}

/// Accepted JSON forms: the struct form, or the `[name, keyPath, options]`
/// tuple form with the options optional.
#[derive(Deserialize)]
#[serde(untagged)]
enum IndexDefinitionRepr {
    Struct {
        name: String,
        #[serde(rename = "keyPath")]
        key_path: KeyPath,
        #[serde(default)]
        options: IndexOptions,
    },
    Tuple(String, KeyPath, IndexOptions),
    Pair(String, KeyPath),
}

impl From<IndexDefinitionRepr> for IndexDefinition {
    fn from(repr: IndexDefinitionRepr) -> Self {
        let (name, key_path, options) = match repr {
            IndexDefinitionRepr::Struct {
                name,
                key_path,
                options,
            } => (name, key_path, options),
            IndexDefinitionRepr::Tuple(name, key_path, options) => (name, key_path, options),
            IndexDefinitionRepr::Pair(name, key_path) => (name, key_path, IndexOptions::default()),
        };
        Self {
            name,
            key_path,
            options,
        }
    }
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            options: IndexOptions::default(),
        }
    }

    /// Mark the index unique.
    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }
}

/// A table: its name, primary key path and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            indexes: Vec::new(),
        }
    }

    /// Add an index.
    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Database name and schema version. Serialized as `[name, version]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, u32)", into = "(String, u32)")]
pub struct ConnectionSettings {
    pub name: String,
    pub version: u32,
}

impl From<(String, u32)> for ConnectionSettings {
    fn from((name, version): (String, u32)) -> Self {
        Self { name, version }
    }
}

impl From<ConnectionSettings> for (String, u32) {
    fn from(settings: ConnectionSettings) -> Self {
        (settings.name, settings.version)
    }
}

/// What an upgrade does to tables that already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeStrategy {
    /// Drop every declared table and create it again. Existing records in
    /// declared tables are discarded.
    #[default]
    Recreate,
    /// Create declared tables and indexes that are missing; leave existing
    /// tables and their records alone.
    Additive,
}

/// Database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub schema: Vec<TableDefinition>,
    #[serde(default)]
    pub upgrade: UpgradeStrategy,
}

impl Default for Settings {
    /// A single `sample_table` keyed by `id` in database `easy_db` v1.
    fn default() -> Self {
        Settings::new("easy_db", 1).table(
            TableDefinition::new("sample_table", "id")
                .index(IndexDefinition::new("by_id", "id").unique()),
        )
    }
}

impl Settings {
    /// Settings for `name` at `version` with no tables.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            connection: ConnectionSettings {
                name: name.into(),
                version,
            },
            schema: Vec::new(),
            upgrade: UpgradeStrategy::default(),
        }
    }

    /// Declare a table.
    pub fn table(mut self, table: TableDefinition) -> Self {
        self.schema.push(table);
        self
    }

    pub fn with_upgrade(mut self, upgrade: UpgradeStrategy) -> Self {
        self.upgrade = upgrade;
        self
    }

    /// Parse settings from JSON and validate them.
    pub fn from_json_str(json: &str) -> StoreResult<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| StoreError::Config(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a JSON file and validate them.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("cannot read settings from {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Look up a declared table.
    pub fn table_definition(&self, name: &str) -> Option<&TableDefinition> {
        self.schema.iter().find(|table| table.name == name)
    }

    /// Check the declarations before they reach an engine.
    pub fn validate(&self) -> StoreResult<()> {
        if self.connection.name.is_empty() {
            return Err(StoreError::Config("database name is empty".into()));
        }
        if self.connection.version == 0 {
            return Err(StoreError::Config(
                "database version must be at least 1".into(),
            ));
        }

        let mut tables = HashSet::new();
        for table in &self.schema {
            if table.name.is_empty() {
                return Err(StoreError::Schema("table name is empty".into()));
            }
            if !tables.insert(table.name.as_str()) {
                return Err(StoreError::Schema(format!(
                    "table '{}' is declared more than once",
                    table.name
                )));
            }
            if !table.key_path.is_valid() {
                return Err(StoreError::Schema(format!(
                    "table '{}' has an invalid key path '{}'",
                    table.name, table.key_path
                )));
            }

            let mut indexes = HashSet::new();
            for index in &table.indexes {
                if index.name.is_empty() {
                    return Err(StoreError::Schema(format!(
                        "table '{}' has an index with an empty name",
                        table.name
                    )));
                }
                if !indexes.insert(index.name.as_str()) {
                    return Err(StoreError::Schema(format!(
                        "index '{}' is declared more than once on table '{}'",
                        index.name, table.name
                    )));
                }
                if !index.key_path.is_valid() {
                    return Err(StoreError::Schema(format!(
                        "index '{}' on table '{}' has an invalid key path '{}'",
                        index.name, table.name, index.key_path
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Apply the declared schema during an upgrade from `old_version`.
pub fn apply_schema(
    editor: &mut dyn SchemaEditor,
    settings: &Settings,
    old_version: u32,
) -> StoreResult<()> {
    debug!(
        database = %settings.connection.name,
        from = old_version,
        to = settings.connection.version,
        strategy = ?settings.upgrade,
        "applying schema"
    );

    match settings.upgrade {
        UpgradeStrategy::Recreate => {
            for table in &settings.schema {
                match editor.delete_table(&table.name) {
                    Ok(()) | Err(StoreError::UnknownTable(_)) => {}
                    Err(e) => return Err(e),
                }
                create_table(editor, table)?;
            }
        }
        UpgradeStrategy::Additive => {
            let existing = editor.table_names()?;
            for table in &settings.schema {
                if !existing.contains(&table.name) {
                    create_table(editor, table)?;
                    continue;
                }
                let indexes = editor.index_names(&table.name)?;
                for index in &table.indexes {
                    if !indexes.contains(&index.name) {
                        editor.create_index(&table.name, index)?;
                    }
                }
            }
        }
    }

    Ok(())
}

fn create_table(editor: &mut dyn SchemaEditor, table: &TableDefinition) -> StoreResult<()> {
    editor.create_table(&table.name, &table.key_path)?;
    for index in &table.indexes {
        editor.create_index(&table.name, index)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.connection.name, "easy_db");
        assert_eq!(settings.connection.version, 1);
        assert_eq!(settings.schema.len(), 1);
        assert_eq!(settings.schema[0].name, "sample_table");
        assert!(settings.schema[0].indexes[0].options.unique);
        settings.validate().unwrap();
    }

    #[test]
    fn test_settings_from_json() {
        let settings = Settings::from_json_str(
            r#"{
                "connection": ["app", 3],
                "schema": [{
                    "name": "users",
                    "keyPath": "id",
                    "indexes": [
                        ["by_email", "email", {"unique": true}],
                        ["by_role", "role"],
                        {"name": "by_city", "keyPath": "address.city"}
                    ]
                }],
                "upgrade": "additive"
            }"#,
        )
        .unwrap();

        let expected = Settings::new("app", 3)
            .table(
                TableDefinition::new("users", "id")
                    .index(IndexDefinition::new("by_email", "email").unique())
                    .index(IndexDefinition::new("by_role", "role"))
                    .index(IndexDefinition::new("by_city", "address.city")),
            )
            .with_upgrade(UpgradeStrategy::Additive);
        assert_eq!(settings, expected);
    }

    #[test]
    fn test_settings_serialize_connection_as_pair() {
        let json = serde_json::to_value(Settings::new("app", 2)).unwrap();
        assert_eq!(json["connection"], serde_json::json!(["app", 2]));
        assert_eq!(json["upgrade"], serde_json::json!("recreate"));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let result = Settings::load("/nonexistent/easydb/settings.json");
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let settings = Settings::new("app", 1)
            .table(TableDefinition::new("t", "id"))
            .table(TableDefinition::new("t", "id"));
        assert!(matches!(settings.validate(), Err(StoreError::Schema(_))));

        let settings = Settings::new("app", 1).table(
            TableDefinition::new("t", "id")
                .index(IndexDefinition::new("i", "a"))
                .index(IndexDefinition::new("i", "b")),
        );
        assert!(matches!(settings.validate(), Err(StoreError::Schema(_))));
    }

    #[test]
    fn test_validate_rejects_bad_paths_and_version() {
        let settings = Settings::new("app", 1).table(TableDefinition::new("t", ""));
        assert!(matches!(settings.validate(), Err(StoreError::Schema(_))));

        let settings = Settings::new("app", 0);
        assert!(matches!(settings.validate(), Err(StoreError::Config(_))));

        let result = Settings::from_json_str(r#"{"connection": "app"}"#);
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
