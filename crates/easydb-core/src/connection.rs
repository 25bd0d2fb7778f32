//! Connection manager
//!
//! Opens one connection per logical operation against the configured
//! database, running the schema manager whenever the engine reports that the
//! stored version is behind the declared one.

use std::sync::Arc;

use crate::schema::{apply_schema, Settings};
use crate::storage::{SchemaEditor, StorageEngine, StoreResult};

/// Opens connections to the database described by a set of [`Settings`].
pub struct ConnectionManager<E> {
    engine: Arc<E>,
    settings: Arc<Settings>,
}

impl<E> Clone for ConnectionManager<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<E: StorageEngine> ConnectionManager<E> {
    /// Validate the settings and wrap the engine.
    pub fn new(engine: E, settings: Settings) -> StoreResult<Self> {
        settings.validate()?;
        Ok(Self {
            engine: Arc::new(engine),
            settings: Arc::new(settings),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Open a connection, upgrading the schema first if needed.
    pub fn open(&self) -> StoreResult<E::Connection> {
        let settings = &self.settings;
        let mut upgrade = |editor: &mut dyn SchemaEditor, old_version: u32| {
            apply_schema(editor, settings, old_version)
        };
        self.engine.open(
            &settings.connection.name,
            settings.connection.version,
            &mut upgrade,
        )
    }

    /// Delete the whole database.
    pub fn delete_database(&self) -> StoreResult<()> {
        self.engine.delete_database(&self.settings.connection.name)
    }
}
