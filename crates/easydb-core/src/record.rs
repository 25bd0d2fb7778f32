//! Records and record batches

use serde_json::Value;

/// A stored record. Records are opaque JSON values; the only structure the
/// store relies on is the table's key path.
pub type Record = Value;

/// One or more records handed to a write.
///
/// A JSON array converts into a batch of its elements; any other value is a
/// batch of one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Records(Vec<Record>);

impl Records {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.0.iter()
    }

}

impl From<Value> for Records {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Records(items),
            other => Records(vec![other]),
        }
    }
}

impl From<Vec<Record>> for Records {
    fn from(records: Vec<Record>) -> Self {
        Records(records)
    }
}

impl IntoIterator for Records {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Records {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build a predicate matching records whose properties equal every property
/// of `pattern`.
///
/// `matching(json!({"role": "admin"}))` accepts `{"id": 1, "role": "admin"}`
/// and rejects `{"id": 2, "role": "user"}`. An empty object pattern accepts
/// every object record. Non-object patterns accept nothing.
///
/// Numbers compare by value, so a pattern `2` matches a stored `2.0`.
pub fn matching(pattern: Value) -> impl Fn(&Record) -> bool + Send + Sync + 'static {
    move |record| match (&pattern, record) {
        (Value::Object(wanted), Value::Object(fields)) => wanted
            .iter()
            .all(|(name, value)| fields.get(name).is_some_and(|field| same(field, value))),
        _ => false,
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(name, x)| ys.get(name).is_some_and(|y| same(x, y)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_becomes_batch() {
        let records = Records::from(json!([{"id": 1}, {"id": 2}]));
        assert_eq!(records.len(), 2);

        let single = Records::from(json!({"id": 1}));
        assert_eq!(single.iter().collect::<Vec<_>>(), vec![&json!({"id": 1})]);
    }

    #[test]
    fn test_matching() {
        let admins = matching(json!({"role": "admin"}));
        assert!(admins(&json!({"id": 1, "role": "admin"})));
        assert!(!admins(&json!({"id": 2, "role": "user"})));
        assert!(!admins(&json!({"id": 3})));

        let everything = matching(json!({}));
        assert!(everything(&json!({"id": 1})));

        let nothing = matching(json!(5));
        assert!(!nothing(&json!({"id": 1})));
    }

    #[test]
    fn test_matching_compares_numbers_by_value() {
        let two = matching(json!({"score": 2}));
        assert!(two(&json!({"id": 1, "score": 2.0})));
        assert!(two(&json!({"id": 2, "score": 2})));
        assert!(!two(&json!({"id": 3, "score": 2.5})));

        let nested = matching(json!({"stats": {"hits": [1, 2]}}));
        assert!(nested(&json!({"stats": {"hits": [1.0, 2.0]}})));
        assert!(!nested(&json!({"stats": {"hits": [1.0, 2.0], "misses": 0}})));
        assert!(!nested(&json!({"stats": {"hits": [1, 2, 3]}})));
    }
}
