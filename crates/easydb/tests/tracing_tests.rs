//! Logging setup: runs in its own test binary since the subscriber is global.

use easydb::{EasyDb, MemoryEngine, StoreError};
use serde_json::json;

#[tokio::test]
async fn test_subscriber_installs_once_and_facade_logs_through_it() {
    easydb::tracing::try_init("easydb=debug").unwrap();

    // A second install is refused; the lenient helpers swallow that.
    assert!(easydb::tracing::try_init("easydb=debug").is_err());
    easydb::tracing::init();
    easydb::tracing::init_with_filter("easydb=trace");

    let db = EasyDb::with_default_settings(MemoryEngine::new())
        .await
        .unwrap();
    let table = db.get("sample_table");
    table.insert(json!({"id": 1}), false).await.unwrap();

    // Engine errors still reach the caller once a subscriber is installed.
    let err = table.insert(json!({"id": 1}), false).await.unwrap_err();
    assert!(matches!(err.as_store(), Some(StoreError::Constraint(_))));
}
