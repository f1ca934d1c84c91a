// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use rabbitmq_pipeline::{
    log_record::{LogRecord, Severity},
    store::{Appended, LogStore, SqliteLogStore, StoreError},
};
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> SqliteLogStore {
    let path = dir.path().join("logs.db");
    SqliteLogStore::open(path.to_str().unwrap(), 2).unwrap()
}

fn row_count(store: &SqliteLogStore) -> i64 {
    let conn = store.pool().get().unwrap();
    conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn append_inserts_record() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.ensure_schema().await.unwrap();

    let record = LogRecord::new("ProducerService", "Task #1 created", Severity::Info);
    assert_eq!(store.append(&record).await.unwrap(), Appended::Inserted);
    assert_eq!(row_count(&store), 1);
}

#[tokio::test]
async fn redelivered_record_is_stored_once() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.ensure_schema().await.unwrap();

    let record = LogRecord::new("ConsumerService", "Consumer Processing Error", Severity::Error)
        .with_stack_trace("invalid message content (contains 0)");

    assert_eq!(store.append(&record).await.unwrap(), Appended::Inserted);
    assert_eq!(store.append(&record).await.unwrap(), Appended::AlreadyPresent);
    assert_eq!(row_count(&store), 1);
}

#[tokio::test]
async fn stored_columns() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.ensure_schema().await.unwrap();

    let record = LogRecord::new("ProducerService", "Producer Error", Severity::Critical)
        .with_stack_trace("Simulated error at #10");
    store.append(&record).await.unwrap();

    let conn = store.pool().get().unwrap();
    let (service, kind, trace): (String, String, Option<String>) = conn
        .query_row(
            "SELECT service_name, type, stack_trace FROM logs WHERE id = ?1",
            [record.id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();

    assert_eq!(service, "ProducerService");
    assert_eq!(kind, "Critical");
    assert_eq!(trace.as_deref(), Some("Simulated error at #10"));
}

#[tokio::test]
async fn ensure_schema_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store.ensure_schema().await.unwrap();
    store.ensure_schema().await.unwrap();
    assert_eq!(row_count(&store), 0);
}

#[tokio::test]
async fn closed_store_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    store.ensure_schema().await.unwrap();
    store.close();

    let record = LogRecord::new("ProducerService", "Task #2 created", Severity::Info);
    assert!(matches!(
        store.append(&record).await,
        Err(StoreError::Closed)
    ));
    assert!(store.is_closed());
}

#[tokio::test]
async fn append_without_schema_is_a_permanent_failure() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let record = LogRecord::new("ProducerService", "Task #3 created", Severity::Info);
    let err = store.append(&record).await.unwrap_err();

    assert!(matches!(err, StoreError::Storage(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn exhausted_pool_is_transient() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs.db");
    let store = SqliteLogStore::open(path.to_str().unwrap(), 1).unwrap();
    store.ensure_schema().await.unwrap();

    let held = store.pool().get().unwrap();
    let record = LogRecord::new("ProducerService", "Task #4 created", Severity::Info);
    let err = store.append(&record).await.unwrap_err();
    drop(held);

    assert!(matches!(err, StoreError::Unavailable(_)));
    assert!(err.is_transient());
    assert_eq!(store.append(&record).await.unwrap(), Appended::Inserted);
}
