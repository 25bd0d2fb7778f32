//! Query tests for the SQLite engine: ordering, pagination, index lookups,
//! predicates and schema upgrades

use easydb_core::{
    matching, ConnectionManager, IndexDefinition, Order, Record, Settings, StoreError,
    TableAccessor, TableDefinition, UpgradeStrategy,
};
use easydb_sqlite::SqliteEngine;
use pretty_assertions::assert_eq;
use serde_json::json;

fn table_with(settings: Settings, name: &str) -> TableAccessor<SqliteEngine> {
    let connections = ConnectionManager::new(SqliteEngine::in_memory(), settings).unwrap();
    TableAccessor::new(name, connections)
}

fn numbers() -> TableAccessor<SqliteEngine> {
    let table = table_with(
        Settings::new("app", 1).table(TableDefinition::new("numbers", "id")),
        "numbers",
    );
    let records: Vec<Record> = (1..=5).map(|id| json!({"id": id})).collect();
    table.insert(records, false).unwrap();
    table
}

fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
}

#[test]
fn test_all_orders_by_primary_key() {
    let table = table_with(
        Settings::new("app", 1).table(TableDefinition::new("t", "id")),
        "t",
    );
    table
        .insert(json!([{"id": 30}, {"id": -1}, {"id": 2.5}, {"id": "b"}, {"id": "a"}]), false)
        .unwrap();

    let keys: Vec<_> = table
        .all()
        .unwrap()
        .into_iter()
        .map(|r| r["id"].clone())
        .collect();
    assert_eq!(
        keys,
        vec![json!(-1), json!(2.5), json!(30), json!("a"), json!("b")]
    );
}

#[test]
fn test_limit_pagination() {
    let table = numbers();
    assert_eq!(ids(&table.limit(2, 0, Order::Asc).unwrap()), vec![1, 2]);
    assert_eq!(ids(&table.limit(2, 2, Order::Desc).unwrap()), vec![3, 2]);
    assert_eq!(ids(&table.limit(3, 4, Order::Asc).unwrap()), vec![5]);
    assert!(table.limit(1, 5, Order::Desc).unwrap().is_empty());
}

#[test]
fn test_find_by_non_unique_index() {
    let table = table_with(
        Settings::new("app", 1).table(
            TableDefinition::new("users", "id").index(IndexDefinition::new("by_role", "role")),
        ),
        "users",
    );
    table
        .insert(
            json!([
                {"id": 4, "role": "admin"},
                {"id": 2, "role": "user"},
                {"id": 1, "role": "admin"}
            ]),
            false,
        )
        .unwrap();

    assert_eq!(
        ids(&table.find_by("by_role", &json!("admin")).unwrap()),
        vec![1, 4]
    );
    assert!(table.find_by("by_role", &json!("guest")).unwrap().is_empty());

    // Index entries follow updates and deletes
    table.update(json!({"id": 4, "role": "user"})).unwrap();
    table.delete(&1.into()).unwrap();
    assert!(table.find_by("by_role", &json!("admin")).unwrap().is_empty());
    assert_eq!(
        ids(&table.find_by("by_role", &json!("user")).unwrap()),
        vec![2, 4]
    );
}

#[test]
fn test_compound_and_nested_key_paths() {
    let table = table_with(
        Settings::new("app", 1).table(
            TableDefinition::new("people", vec!["last", "first"])
                .index(IndexDefinition::new("by_city", "address.city")),
        ),
        "people",
    );
    table
        .insert(
            json!([
                {"first": "Ada", "last": "Lovelace", "address": {"city": "London"}},
                {"first": "Alan", "last": "Turing", "address": {"city": "London"}},
                {"first": "Grace", "last": "Hopper", "address": {"city": "New York"}}
            ]),
            false,
        )
        .unwrap();

    let londoners: Vec<_> = table
        .find_by("by_city", &json!("London"))
        .unwrap()
        .into_iter()
        .map(|r| r["last"].clone())
        .collect();
    assert_eq!(londoners, vec![json!("Lovelace"), json!("Turing")]);

    let first = table.limit(1, 0, Order::Asc).unwrap();
    assert_eq!(first[0]["last"], "Hopper");
}

#[test]
fn test_filter_with_pattern() {
    let table = table_with(
        Settings::new("app", 1).table(TableDefinition::new("users", "id")),
        "users",
    );
    table
        .insert(
            json!([
                {"id": 1, "role": "admin", "active": true},
                {"id": 2, "role": "admin", "active": false},
                {"id": 3, "role": "user", "active": true}
            ]),
            false,
        )
        .unwrap();

    let active_admins = table
        .filter(matching(json!({"role": "admin", "active": true})))
        .unwrap();
    assert_eq!(ids(&active_admins), vec![1]);
}

#[test]
fn test_filter_pattern_matches_float_and_integer_values() {
    let table = table_with(
        Settings::new("app", 1).table(TableDefinition::new("scores", "id")),
        "scores",
    );
    table
        .insert(
            json!([
                {"id": 1, "score": 2.0},
                {"id": 2, "score": 2},
                {"id": 3, "score": 3}
            ]),
            false,
        )
        .unwrap();

    let hits = table.filter(matching(json!({"score": 2}))).unwrap();
    assert_eq!(ids(&hits), vec![1, 2]);
}

#[test]
fn test_unknown_index_and_table() {
    let table = numbers();
    assert!(matches!(
        table.find_by("missing", &json!(1)),
        Err(StoreError::UnknownIndex { .. })
    ));

    let other = table_with(Settings::default(), "missing");
    assert!(matches!(other.all(), Err(StoreError::UnknownTable(_))));
}

#[test]
fn test_upgrade_strategies() {
    let dir = tempfile::tempdir().unwrap();
    let v1 = Settings::new("app", 1).table(TableDefinition::new("users", "id"));
    let open = |settings: Settings| {
        let engine = SqliteEngine::open_dir(dir.path()).unwrap();
        TableAccessor::new("users", ConnectionManager::new(engine, settings).unwrap())
    };

    open(v1).insert(json!({"id": 1, "role": "admin"}), false).unwrap();

    // Additive keeps records and indexes the new index from them
    let v2 = Settings::new("app", 2)
        .table(TableDefinition::new("users", "id").index(IndexDefinition::new("by_role", "role")))
        .with_upgrade(UpgradeStrategy::Additive);
    let table = open(v2);
    assert_eq!(
        ids(&table.find_by("by_role", &json!("admin")).unwrap()),
        vec![1]
    );

    // Recreate starts the table over
    let v3 = Settings::new("app", 3)
        .table(TableDefinition::new("users", "id").index(IndexDefinition::new("by_role", "role")));
    assert_eq!(open(v3).count().unwrap(), 0);
}
