//! Low-level IndexedDB helpers using web-sys
//!
//! Wraps the callback-based IndexedDB API into Rust futures using
//! `wasm_bindgen_futures::JsFuture` and `js_sys::Promise`.

use std::cell::RefCell;
use std::rc::Rc;

use easydb_core::schema::{apply_schema, IndexDefinition, Settings};
use easydb_core::storage::{SchemaEditor, StoreError, StoreResult};
use easydb_core::KeyPath;
use js_sys::Promise;
use tracing::{debug, error};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    DomStringList, IdbDatabase, IdbFactory, IdbObjectStore, IdbOpenDbRequest, IdbRequest,
    IdbTransaction, IdbTransactionMode, IdbVersionChangeEvent,
};

use crate::error::{IndexedDbError, Result};
use crate::js::key_path_to_js;

/// Type alias for upgrade closure to reduce complexity
type UpgradeClosure = Rc<RefCell<Option<Closure<dyn FnMut(IdbVersionChangeEvent)>>>>;

type EventClosure = Closure<dyn FnMut(web_sys::Event)>;

/// Get the global IndexedDB factory.
pub fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| IndexedDbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(IndexedDbError::NotAvailable(
            "indexedDB is null/undefined".into(),
        ));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| IndexedDbError::NotAvailable("indexedDB is not IdbFactory".into()))
}

/// Convert an IdbRequest into a JS Promise that resolves with the request's
/// result, or rejects with the request's DOMException.
fn request_to_promise(req: &IdbRequest) -> Promise {
    let req_success = req.clone();
    let req_error = req.clone();

    Promise::new(&mut move |resolve, reject| {
        // Store closures in Rc<RefCell> to manage their lifetime without leaking
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let req_s = req_success.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            *closures_for_success.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req_error.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let reason = req_e
                .error()
                .ok()
                .flatten()
                .map(JsValue::from)
                .unwrap_or_else(|| JsValue::from_str("unknown IDB error"));
            let _ = reject.call1(&JsValue::UNDEFINED, &reason);
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        req_success.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req_error.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_success, on_error));
    })
}

/// Convert an IdbTransaction completion into a JS Promise.
///
/// Rejects on the first request error bubbling up to the transaction, or when
/// the transaction aborts. A failed request is always followed by `abort`, so
/// the handlers are released only on `complete` or `abort`.
fn transaction_to_promise(tx: &IdbTransaction) -> Promise {
    let tx_events = tx.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let closures_for_complete = closures.clone();
        let on_complete = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = resolve.call0(&JsValue::UNDEFINED);
            *closures_for_complete.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        // The failing request is the event target; its error is set before the
        // transaction's own error is.
        let tx_e = tx_events.clone();
        let reject_error = reject.clone();
        let on_error = Closure::wrap(Box::new(move |event: web_sys::Event| {
            let reason = event
                .target()
                .and_then(|target| target.dyn_into::<IdbRequest>().ok())
                .and_then(|req| req.error().ok().flatten())
                .or_else(|| tx_e.error())
                .map(JsValue::from)
                .unwrap_or_else(|| JsValue::from_str("transaction error"));
            let _ = reject_error.call1(&JsValue::UNDEFINED, &reason);
        }) as Box<dyn FnMut(web_sys::Event)>);

        let tx_a = tx_events.clone();
        let closures_for_abort = closures.clone();
        let on_abort = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let reason = tx_a
                .error()
                .map(JsValue::from)
                .unwrap_or_else(|| JsValue::from_str("transaction aborted"));
            let _ = reject.call1(&JsValue::UNDEFINED, &reason);
            *closures_for_abort.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        tx_events.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        tx_events.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        tx_events.set_onabort(Some(on_abort.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_complete, on_error, on_abort));
    })
}

/// Open the database described by `settings`, applying the declared schema
/// in the versionchange transaction when the stored version is older.
pub async fn open_database(settings: &Settings) -> Result<IdbDatabase> {
    let factory = idb_factory()?;
    let name = settings.connection.name.as_str();

    let open_req: IdbOpenDbRequest = factory
        .open_with_u32(name, settings.connection.version)
        .map_err(|e| IndexedDbError::Open(format!("{:?}", e)))?;

    let failure: Rc<RefCell<Option<StoreError>>> = Rc::new(RefCell::new(None));
    let failure_for_upgrade = failure.clone();

    // Store upgrade closure to manage its lifetime without leaking
    let upgrade_closure: UpgradeClosure = Rc::new(RefCell::new(None));
    let upgrade_closure_for_drop = upgrade_closure.clone();

    let schema = settings.clone();
    let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        if let Err(e) = upgrade(&event, &schema) {
            error!(database = %schema.connection.name, error = %e, "schema upgrade failed");
            *failure_for_upgrade.borrow_mut() = Some(e);
        }
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    open_req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
    *upgrade_closure.borrow_mut() = Some(on_upgrade);

    let open_promise = request_to_promise(open_req.unchecked_ref());
    let result = wasm_bindgen_futures::JsFuture::from(open_promise).await;

    // Clean up upgrade closure now that open is complete
    *upgrade_closure_for_drop.borrow_mut() = None;

    if let Some(e) = failure.borrow_mut().take() {
        return Err(e.into());
    }

    result?
        .dyn_into::<IdbDatabase>()
        .map_err(|_| IndexedDbError::Open("result is not IdbDatabase".into()))
}

/// Runs inside `onupgradeneeded`. Aborts the versionchange transaction on
/// failure so the stored schema and version stay as they were.
fn upgrade(event: &IdbVersionChangeEvent, settings: &Settings) -> StoreResult<()> {
    let req: IdbOpenDbRequest = event
        .target()
        .ok_or_else(|| StoreError::Connection("upgrade event has no target".into()))?
        .unchecked_into();
    let db: IdbDatabase = req.result().map_err(IndexedDbError::from)?.unchecked_into();
    let tx = req.transaction().ok_or_else(|| {
        StoreError::Transaction("upgrade has no versionchange transaction".into())
    })?;

    let old_version = event.old_version() as u32;
    debug!(
        database = %settings.connection.name,
        from = old_version,
        to = settings.connection.version,
        "upgrading indexeddb database"
    );

    let mut editor = IdbSchemaEditor { db: &db, tx: &tx };
    if let Err(e) = apply_schema(&mut editor, settings, old_version) {
        let _ = tx.abort();
        return Err(e);
    }
    Ok(())
}

fn names(list: DomStringList) -> Vec<String> {
    let mut names: Vec<String> = (0..list.length()).filter_map(|i| list.item(i)).collect();
    names.sort();
    names
}

/// Schema editing inside a versionchange transaction. IndexedDB's schema
/// calls are synchronous, so this implements the core trait directly.
struct IdbSchemaEditor<'a> {
    db: &'a IdbDatabase,
    tx: &'a IdbTransaction,
}

impl IdbSchemaEditor<'_> {
    fn object_store(&self, table: &str) -> StoreResult<IdbObjectStore> {
        if !self.db.object_store_names().contains(table) {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(self.tx.object_store(table).map_err(IndexedDbError::from)?)
    }
}

impl SchemaEditor for IdbSchemaEditor<'_> {
    fn table_names(&self) -> StoreResult<Vec<String>> {
        Ok(names(self.db.object_store_names()))
    }

    fn create_table(&mut self, name: &str, key_path: &KeyPath) -> StoreResult<()> {
        if self.db.object_store_names().contains(name) {
            return Err(StoreError::Schema(format!("table '{}' already exists", name)));
        }
        let params = web_sys::IdbObjectStoreParameters::new();
        js_sys::Reflect::set(&params, &"keyPath".into(), &key_path_to_js(key_path))
            .map_err(IndexedDbError::from)?;
        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(IndexedDbError::from)?;
        Ok(())
    }

    fn delete_table(&mut self, name: &str) -> StoreResult<()> {
        if !self.db.object_store_names().contains(name) {
            return Err(StoreError::UnknownTable(name.to_string()));
        }
        self.db
            .delete_object_store(name)
            .map_err(IndexedDbError::from)?;
        Ok(())
    }

    fn create_index(&mut self, table: &str, index: &IndexDefinition) -> StoreResult<()> {
        let store = self.object_store(table)?;
        if store.index_names().contains(&index.name) {
            return Err(StoreError::Schema(format!(
                "index '{}' already exists on table '{}'",
                index.name, table
            )));
        }

        let params = web_sys::IdbIndexParameters::new();
        js_sys::Reflect::set(
            &params,
            &"unique".into(),
            &JsValue::from_bool(index.options.unique),
        )
        .map_err(IndexedDbError::from)?;

        let created = match &index.key_path {
            KeyPath::Single(path) => {
                store.create_index_with_str_and_optional_parameters(&index.name, path, &params)
            }
            KeyPath::Compound(_) => store.create_index_with_str_sequence_and_optional_parameters(
                &index.name,
                &key_path_to_js(&index.key_path),
                &params,
            ),
        };
        created.map_err(IndexedDbError::from)?;
        Ok(())
    }

    fn index_names(&self, table: &str) -> StoreResult<Vec<String>> {
        Ok(names(self.object_store(table)?.index_names()))
    }
}

/// Start a transaction on one table.
pub fn begin_transaction(
    db: &IdbDatabase,
    table: &str,
    mode: IdbTransactionMode,
) -> Result<(IdbTransaction, IdbObjectStore)> {
    let tx = db
        .transaction_with_str_and_mode(table, mode)
        .map_err(|e| IndexedDbError::Transaction(format!("{:?}", e)))?;
    let store = tx.object_store(table)?;
    Ok((tx, store))
}

/// Await an IdbRequest, resolving to its result JsValue.
pub async fn await_request(req: &IdbRequest) -> Result<JsValue> {
    let promise = request_to_promise(req);
    Ok(wasm_bindgen_futures::JsFuture::from(promise).await?)
}

/// Await an IdbTransaction to complete.
pub async fn await_transaction(tx: &IdbTransaction) -> Result<()> {
    let promise = transaction_to_promise(tx);
    wasm_bindgen_futures::JsFuture::from(promise).await?;
    Ok(())
}

/// Delete an IndexedDB database by name.
pub async fn delete_database(db_name: &str) -> Result<()> {
    let factory = idb_factory()?;
    let req = factory
        .delete_database(db_name)
        .map_err(|e| IndexedDbError::Open(format!("delete db: {:?}", e)))?;
    let promise = request_to_promise(req.unchecked_ref());
    wasm_bindgen_futures::JsFuture::from(promise).await?;
    Ok(())
}
