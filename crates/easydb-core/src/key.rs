//! Record keys and key paths
//!
//! A [`Key`] is what tables are ordered by and what indexes map from. Valid keys
//! are finite numbers, strings, and arrays of valid keys, ordered the way
//! IndexedDB orders them: every number sorts before every string, every string
//! before every array. Numbers compare by value, strings by code point, arrays
//! element-wise with a shorter prefix first.
//!
//! Engines that sort raw bytes use [`Key::encode`], an order-preserving binary
//! encoding:
//!
//! * number: `0x10`, then the big-endian IEEE 754 bits with the sign bit
//!   flipped (all bits flipped if negative).
//! * string: `0x20`, then the UTF-8 bytes with `0x00` escaped as `0x00ff`,
//!   terminated with `0x0000`.
//! * array: `0x30`, then each element's encoding, terminated with `0x00`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;

const TAG_NUMBER: u8 = 0x10;
const TAG_STRING: u8 = 0x20;
const TAG_ARRAY: u8 = 0x30;
const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xff;

/// A primary or index key extracted from a record.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Convert a JSON value into a key.
    ///
    /// Returns `None` for values IndexedDB would reject as keys: null, booleans,
    /// objects, and arrays containing any of those.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).map(Key::Number),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Convert the key back into a JSON value.
    ///
    /// Integral numbers come back as JSON integers so they compare equal to the
    /// values records were written with.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => {
                let n = normalize(*n);
                if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
                    Value::from(n as i64)
                } else {
                    serde_json::Number::from_f64(n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Encode the key so that byte-wise comparison matches [`Ord`] on keys.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Key::Number(n) => {
                out.push(TAG_NUMBER);
                let bits = normalize(*n).to_bits();
                let bits = if bits >> 63 == 1 { !bits } else { bits | 1 << 63 };
                out.extend_from_slice(&bits.to_be_bytes());
            }
            Key::String(s) => {
                out.push(TAG_STRING);
                for &byte in s.as_bytes() {
                    if byte == TERMINATOR {
                        out.extend_from_slice(&[TERMINATOR, ESCAPE]);
                    } else {
                        out.push(byte);
                    }
                }
                out.extend_from_slice(&[TERMINATOR, TERMINATOR]);
            }
            Key::Array(items) => {
                out.push(TAG_ARRAY);
                for item in items {
                    item.encode_into(out);
                }
                out.push(TERMINATOR);
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

/// Fold `-0.0` into `0.0`; the two are the same key.
fn normalize(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => normalize(*a).total_cmp(&normalize(*b)),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(f64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

/// Where a key lives inside a record.
///
/// A single path is a dotted property path (`"id"`, `"profile.email"`). A
/// compound path lists several dotted paths and yields an array key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// Evaluate the path against a record. `None` when any component is
    /// missing or is not a valid key.
    pub fn extract(&self, record: &Record) -> Option<Key> {
        match self {
            KeyPath::Single(path) => lookup(record, path).and_then(Key::from_value),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|path| lookup(record, path).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// A path is valid when it names at least one property and no segment is empty.
    pub fn is_valid(&self) -> bool {
        fn valid(path: &str) -> bool {
            !path.is_empty() && path.split('.').all(|segment| !segment.is_empty())
        }

        match self {
            KeyPath::Single(path) => valid(path),
            KeyPath::Compound(paths) => !paths.is_empty() && paths.iter().all(|p| valid(p)),
        }
    }
}

fn lookup<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |value, segment| value.get(segment))
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(path) => f.write_str(path),
            KeyPath::Compound(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Compound(paths.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_from_value_rejects_non_keys() {
        assert!(Key::from_value(&json!(null)).is_none());
        assert!(Key::from_value(&json!(true)).is_none());
        assert!(Key::from_value(&json!({"a": 1})).is_none());
        assert!(Key::from_value(&json!([1, false])).is_none());
        assert_eq!(Key::from_value(&json!([1, "a"])), Some(Key::Array(vec![1.into(), "a".into()])));
    }

    #[test]
    fn test_type_ordering() {
        let mut keys = vec![
            Key::Array(vec![Key::from("z")]),
            Key::from("b"),
            Key::from(10),
            Key::from("a"),
            Key::Number(-1.5),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Number(-1.5),
                Key::from(10),
                Key::from("a"),
                Key::from("b"),
                Key::Array(vec![Key::from("z")]),
            ]
        );
    }

    #[test]
    fn test_negative_zero_is_zero() {
        assert_eq!(Key::Number(-0.0), Key::Number(0.0));
        assert_eq!(Key::Number(-0.0).encode(), Key::Number(0.0).encode());
    }

    #[test]
    fn test_encoding_preserves_order() {
        let mut keys = vec![
            Key::Number(f64::MIN),
            Key::Number(-100.0),
            Key::Number(-0.5),
            Key::Number(0.0),
            Key::Number(0.25),
            Key::Number(3.0),
            Key::Number(1e12),
            Key::from(""),
            Key::from("a"),
            Key::from("a\0"),
            Key::from("a\0b"),
            Key::from("ab"),
            Key::from("b"),
            Key::from("é"),
            Key::Array(vec![]),
            Key::Array(vec![Key::from(1)]),
            Key::Array(vec![Key::from(1), Key::from("a")]),
            Key::Array(vec![Key::from(2)]),
            Key::Array(vec![Key::from("a")]),
            Key::Array(vec![Key::from("a"), Key::from(1)]),
            Key::Array(vec![Key::Array(vec![])]),
        ];
        let expected = keys.clone();
        keys.sort();
        assert_eq!(keys, expected);

        for pair in expected.windows(2) {
            assert!(
                pair[0].encode() < pair[1].encode(),
                "{} should encode below {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_to_value_keeps_integers() {
        assert_eq!(Key::from(7).to_value(), json!(7));
        assert_eq!(Key::Number(1.5).to_value(), json!(1.5));
        assert_eq!(
            Key::Array(vec![Key::from(1), Key::from("x")]).to_value(),
            json!([1, "x"])
        );
    }

    #[test]
    fn test_key_path_extract() {
        let record = json!({"id": 4, "profile": {"email": "a@x.com"}, "flag": true});

        assert_eq!(KeyPath::from("id").extract(&record), Some(Key::from(4)));
        assert_eq!(
            KeyPath::from("profile.email").extract(&record),
            Some(Key::from("a@x.com"))
        );
        assert_eq!(KeyPath::from("missing").extract(&record), None);
        assert_eq!(KeyPath::from("flag").extract(&record), None);
        assert_eq!(
            KeyPath::from(vec!["profile.email", "id"]).extract(&record),
            Some(Key::Array(vec![Key::from("a@x.com"), Key::from(4)]))
        );
    }

    #[test]
    fn test_key_path_validity() {
        assert!(KeyPath::from("id").is_valid());
        assert!(KeyPath::from("a.b").is_valid());
        assert!(!KeyPath::from("").is_valid());
        assert!(!KeyPath::from("a..b").is_valid());
        assert!(!KeyPath::Compound(vec![]).is_valid());
    }

    #[test]
    fn test_key_path_serde_forms() {
        let single: KeyPath = serde_json::from_value(json!("id")).unwrap();
        assert_eq!(single, KeyPath::from("id"));

        let compound: KeyPath = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(compound, KeyPath::from(vec!["a", "b"]));
    }
}
