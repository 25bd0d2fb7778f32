//! Conversions between JSON records/keys and JavaScript values
//!
//! Records cross the boundary as JSON text (`JSON.parse` / `JSON.stringify`)
//! so the stored objects are plain JS objects that IndexedDB key paths can
//! reach into.

use easydb_core::{Key, KeyPath, Record};
use wasm_bindgen::JsValue;

use crate::error::{IndexedDbError, Result};

pub fn record_to_js(record: &Record) -> Result<JsValue> {
    let json = serde_json::to_string(record)?;
    Ok(js_sys::JSON::parse(&json)?)
}

pub fn js_to_record(value: &JsValue) -> Result<Record> {
    let json: String = js_sys::JSON::stringify(value)?.into();
    Ok(serde_json::from_str(&json)?)
}

/// Records from an array result (`getAll`).
pub fn js_to_records(value: &JsValue) -> Result<Vec<Record>> {
    js_sys::Array::from(value)
        .iter()
        .map(|item| js_to_record(&item))
        .collect()
}

pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::String(s) => JsValue::from_str(s),
        Key::Array(items) => items
            .iter()
            .map(key_to_js)
            .collect::<js_sys::Array>()
            .into(),
    }
}

pub fn js_to_key(value: &JsValue) -> Result<Key> {
    let json = js_to_record(value)?;
    Key::from_value(&json).ok_or_else(|| {
        IndexedDbError::Request(format!("{} is not a valid key", json))
    })
}

pub fn key_path_to_js(key_path: &KeyPath) -> JsValue {
    match key_path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Compound(paths) => paths
            .iter()
            .map(|path| JsValue::from_str(path))
            .collect::<js_sys::Array>()
            .into(),
    }
}
