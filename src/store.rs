// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Log Storage
//!
//! Append-only durable storage for validated log records. The [`LogStore`]
//! trait is the seam the archival consumer writes through; [`SqliteLogStore`]
//! keeps records in a SQLite table behind an r2d2 pool, taking one pooled
//! connection per append.

use crate::log_record::LogRecord;
use async_trait::async_trait;
use chrono::SecondsFormat;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, ErrorCode};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS logs (
    id           TEXT PRIMARY KEY NOT NULL,
    service_name TEXT NOT NULL,
    message      TEXT NOT NULL,
    type         TEXT NOT NULL,
    stack_trace  TEXT,
    timestamp    TEXT NOT NULL
);";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store was closed. Nothing issued afterwards will succeed.
    #[error("storage closed")]
    Closed,

    /// No connection could be obtained or the engine is temporarily unable
    /// to complete the write (busy, locked, disk full, I/O error). The same
    /// write may succeed later.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The storage engine rejected the operation itself.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::DiskFull
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen,
            ) => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Storage(err.to_string()),
        }
    }
}

/// Result of appending a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    Inserted,
    /// A record with the same id is already stored (a redelivery).
    AlreadyPresent,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Creates the storage schema if it does not exist.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Appends a record. Existing records are never modified.
    async fn append(&self, record: &LogRecord) -> Result<Appended, StoreError>;
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct SqliteLogStore {
    pool: DbPool,
    closed: Arc<AtomicBool>,
}

impl SqliteLogStore {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: &str, pool_max_size: u32) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        });

        let pool = Pool::builder()
            .max_size(pool_max_size)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        Ok(SqliteLogStore {
            pool,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Marks the store as disposed. Appends issued afterwards fail with
    /// [`StoreError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|err| StoreError::Unavailable(err.to_string()))?;
            op(&conn).map_err(StoreError::from)
        })
        .await
        .map_err(|err| {
            if err.is_cancelled() {
                StoreError::Closed
            } else {
                StoreError::Storage(err.to_string())
            }
        })?
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.run(|conn| conn.execute_batch(SCHEMA)).await?;
        debug!("log schema ensured");
        Ok(())
    }

    async fn append(&self, record: &LogRecord) -> Result<Appended, StoreError> {
        let record = record.clone();
        let inserted = self
            .run(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO logs (id, service_name, message, type, stack_trace, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        record.id.to_string(),
                        record.service_name,
                        record.message,
                        record.severity.as_str(),
                        record.stack_trace,
                        record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                    ],
                )
            })
            .await?;

        Ok(if inserted == 0 {
            Appended::AlreadyPresent
        } else {
            Appended::Inserted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn engine_error(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_full_engines_are_transient() {
        for code in [ffi::SQLITE_BUSY, ffi::SQLITE_LOCKED, ffi::SQLITE_FULL, ffi::SQLITE_IOERR] {
            let err = StoreError::from(engine_error(code));
            assert!(err.is_transient(), "code {code} classified as {err:?}");
        }
    }

    #[test]
    fn rejected_statements_are_permanent() {
        for code in [ffi::SQLITE_ERROR, ffi::SQLITE_CONSTRAINT, ffi::SQLITE_CORRUPT] {
            let err = StoreError::from(engine_error(code));
            assert!(matches!(err, StoreError::Storage(_)), "code {code} classified as {err:?}");
        }
        assert!(!StoreError::Closed.is_transient());
    }
}
