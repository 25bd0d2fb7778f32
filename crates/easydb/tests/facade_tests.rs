//! Facade tests: the async API over the memory and SQLite engines

#![cfg(feature = "sqlite")]

use easydb::{
    matching, EasyDb, Error, IndexDefinition, Key, MemoryEngine, Order, Record, Settings,
    SqliteEngine, StoreError, TableDefinition, UpgradeStrategy,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn users_settings(version: u32) -> Settings {
    Settings::new("app", version).table(
        TableDefinition::new("users", "id")
            .index(IndexDefinition::new("by_email", "email").unique()),
    )
}

fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
}

fn is_store_error(err: &Error, check: impl Fn(&StoreError) -> bool) -> bool {
    err.as_store().is_some_and(check)
}

#[tokio::test]
async fn test_default_settings() {
    let db = EasyDb::with_default_settings(MemoryEngine::new())
        .await
        .unwrap();
    assert_eq!(db.settings().connection.name, "easy_db");

    let table = db.get("sample_table");
    table.insert(json!({"id": 1}), false).await.unwrap();
    assert_eq!(table.all().await.unwrap(), vec![json!({"id": 1})]);
}

#[tokio::test]
async fn test_users_end_to_end() {
    async fn run(db: EasyDb<impl easydb_core::storage::StorageEngine + Send + Sync + 'static>) {
        let users = db.open("users");
        users
            .insert(
                json!([
                    {"id": 1, "email": "a@x.com"},
                    {"id": 2, "email": "b@x.com"}
                ]),
                false,
            )
            .await
            .unwrap();

        assert_eq!(
            users.find_by("by_email", &json!("b@x.com")).await.unwrap(),
            vec![json!({"id": 2, "email": "b@x.com"})]
        );
        assert_eq!(ids(&users.limit(1, 0, Order::Desc).await.unwrap()), vec![2]);

        users.update(json!({"id": 1, "email": "c@x.com"})).await.unwrap();
        assert!(users
            .find_by("by_email", &json!("a@x.com"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            users.find_one_by("by_email", &json!("c@x.com")).await.unwrap(),
            Some(json!({"id": 1, "email": "c@x.com"}))
        );

        db.clear("users").await.unwrap();
        assert!(users.all().await.unwrap().is_empty());
    }

    run(EasyDb::new(MemoryEngine::new(), Some(users_settings(1)))
        .await
        .unwrap())
    .await;
    run(EasyDb::new(SqliteEngine::in_memory(), Some(users_settings(1)))
        .await
        .unwrap())
    .await;
}

#[tokio::test]
async fn test_limit_and_filter() {
    let db = EasyDb::new(MemoryEngine::new(), Some(users_settings(1)))
        .await
        .unwrap();
    let users = db.open("users");
    let records: Vec<Record> = (1..=5)
        .map(|id| json!({"id": id, "even": id % 2 == 0}))
        .collect();
    users.insert(records, false).await.unwrap();

    assert_eq!(ids(&users.limit(2, 0, Order::Asc).await.unwrap()), vec![1, 2]);
    assert_eq!(ids(&users.limit(2, 2, Order::Desc).await.unwrap()), vec![3, 2]);

    let even = users.filter(matching(json!({"even": true}))).await.unwrap();
    assert_eq!(ids(&even), vec![2, 4]);
}

#[tokio::test]
async fn test_write_errors_are_returned() {
    let db = EasyDb::new(MemoryEngine::new(), Some(users_settings(1)))
        .await
        .unwrap();
    let users = db.open("users");
    users.insert(json!({"id": 1, "email": "a@x.com"}), false).await.unwrap();

    let err = users
        .insert(json!({"id": 2, "email": "a@x.com"}), false)
        .await
        .unwrap_err();
    assert!(is_store_error(&err, |e| matches!(e, StoreError::Constraint(_))));

    let err = db.open("missing").count().await.unwrap_err();
    assert!(is_store_error(&err, |e| matches!(e, StoreError::UnknownTable(_))));
}

#[tokio::test]
async fn test_get_delete_replace() {
    let db = EasyDb::new(MemoryEngine::new(), Some(users_settings(1)))
        .await
        .unwrap();
    let users = db.open("users");
    users.insert(json!([{"id": 1}, {"id": 2}]), false).await.unwrap();

    assert_eq!(users.get(2).await.unwrap(), Some(json!({"id": 2})));
    assert!(users.delete(Key::from(2)).await.unwrap());
    assert_eq!(users.count().await.unwrap(), 1);

    users.replace(json!([{"id": 5}, {"id": 6}])).await.unwrap();
    assert_eq!(ids(&users.all().await.unwrap()), vec![5, 6]);
}

#[tokio::test]
async fn test_concurrent_inserts() {
    let db = EasyDb::new(MemoryEngine::new(), Some(users_settings(1)))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for id in 0..16 {
        let users = db.open("users");
        handles.push(tokio::spawn(async move {
            users.insert(json!({"id": id}), false).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(db.open("users").count().await.unwrap(), 16);
}

#[tokio::test]
async fn test_invalid_settings_rejected() {
    let result = EasyDb::new(MemoryEngine::new(), Some(Settings::new("app", 0))).await;
    let err = result.err().unwrap();
    assert!(is_store_error(&err, |e| matches!(e, StoreError::Config(_))));
}

#[tokio::test]
async fn test_version_downgrade_fails() {
    let engine = MemoryEngine::new();
    EasyDb::new(engine.clone(), Some(users_settings(2)))
        .await
        .unwrap();

    let err = EasyDb::new(engine, Some(users_settings(1)))
        .await
        .err()
        .unwrap();
    assert!(is_store_error(&err, |e| matches!(e, StoreError::Version { .. })));
}

#[tokio::test]
async fn test_settings_file_and_sqlite_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    std::fs::write(
        &settings_path,
        r#"{
            "connection": ["notes_db", 1],
            "schema": [{
                "name": "notes",
                "keyPath": "id",
                "indexes": [["by_tag", "tag"]]
            }]
        }"#,
    )
    .unwrap();

    let data_dir = dir.path().join("data");
    {
        let settings = Settings::load(&settings_path).unwrap();
        let engine = SqliteEngine::open_dir(&data_dir).unwrap();
        let db = EasyDb::new(engine, Some(settings)).await.unwrap();
        db.open("notes")
            .insert(
                json!([
                    {"id": 1, "tag": "work"},
                    {"id": 2, "tag": "home"},
                    {"id": 3, "tag": "work"}
                ]),
                false,
            )
            .await
            .unwrap();
    }

    let settings = Settings::load(&settings_path).unwrap();
    let engine = SqliteEngine::open_dir(&data_dir).unwrap();
    let db = EasyDb::new(engine, Some(settings)).await.unwrap();
    let work = db.open("notes").find_by("by_tag", &json!("work")).await.unwrap();
    assert_eq!(ids(&work), vec![1, 3]);

    db.delete().await.unwrap();
    assert!(!data_dir.join("notes_db.sqlite3").exists());
}

#[tokio::test]
async fn test_additive_upgrade_through_facade() {
    let engine = MemoryEngine::new();
    let db = EasyDb::new(engine.clone(), Some(users_settings(1)))
        .await
        .unwrap();
    db.open("users").insert(json!({"id": 1, "email": "a@x.com"}), false).await.unwrap();

    let v2 = users_settings(2)
        .table(TableDefinition::new("posts", "id"))
        .with_upgrade(UpgradeStrategy::Additive);
    let db = EasyDb::new(engine, Some(v2)).await.unwrap();
    assert_eq!(db.open("users").count().await.unwrap(), 1);
    assert_eq!(db.open("posts").count().await.unwrap(), 0);
}
