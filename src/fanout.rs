// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Log Fan-out
//!
//! The topic exchange duplicates every log event into the archive queue and,
//! for error and critical keys, into the alert queue. Each path decodes,
//! validates and settles its own copy:
//!
//! | condition                | archive            | alert             |
//! |--------------------------|--------------------|-------------------|
//! | undecodable JSON         | ack, drop          | ack, drop         |
//! | validation failure       | ack, drop          | ack, drop         |
//! | stored / notified        | ack                | ack               |
//! | storage unavailable      | retry with backoff | n/a               |
//! | store closed / shutdown  | leave unsettled    | n/a               |
//! | storage failure          | nack, discard      | n/a               |
//!
//! A transient storage outage holds the archive subscription on the current
//! delivery, so no more than one delivery is ever outstanding per outage.

use crate::{
    backoff::{retry_forever, BackoffPolicy, RetryObserver, TracingRetryObserver},
    consumer::{Acknowledge, DeliveryHandler, Disposition},
    errors::AmqpError,
    log_record::LogRecord,
    store::{Appended, LogStore, StoreError},
    validation::{describe, LogRecordValidator},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Side-effecting notification for error and critical records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, record: &LogRecord);
}

/// Raises alerts on the local error log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertNotifier;

#[async_trait]
impl AlertNotifier for TracingAlertNotifier {
    async fn notify(&self, record: &LogRecord) {
        error!(
            id = %record.id,
            service = %record.service_name,
            severity = %record.severity,
            detail = record.stack_trace.as_deref().unwrap_or_default(),
            "ALERT: {}",
            record.message
        );
    }
}

/// Decodes and validates one payload. `None` means the delivery was settled
/// as dropped.
async fn admit(
    path: &str,
    data: &[u8],
    validator: &LogRecordValidator,
    acker: &dyn Acknowledge,
) -> Result<Option<LogRecord>, AmqpError> {
    let record = match LogRecord::from_slice(data) {
        Ok(record) => record,
        Err(err) => {
            error!(
                path,
                error = err.to_string(),
                raw = %String::from_utf8_lossy(data),
                "failed to deserialize log record, dropping it"
            );
            acker.ack().await?;
            return Ok(None);
        }
    };

    if let Err(violations) = validator.validate(&record) {
        warn!(
            path,
            id = %record.id,
            violations = describe(&violations),
            "log record validation failed, dropping it"
        );
        acker.ack().await?;
        return Ok(None);
    }

    Ok(Some(record))
}

/// Archival path: persists every valid record.
pub struct ArchiveConsumer {
    store: Arc<dyn LogStore>,
    validator: LogRecordValidator,
    policy: BackoffPolicy,
    observer: Arc<dyn RetryObserver>,
    shutdown: CancellationToken,
}

impl ArchiveConsumer {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        ArchiveConsumer {
            store,
            validator: LogRecordValidator::default(),
            policy: BackoffPolicy::default(),
            observer: Arc::new(TracingRetryObserver),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stops retrying a pending write once `token` fires.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_retry(mut self, policy: BackoffPolicy, observer: Arc<dyn RetryObserver>) -> Self {
        self.policy = policy;
        self.observer = observer;
        self
    }

    /// Appends `record`, waiting out transient failures. The outer error is
    /// [`AmqpError::Cancelled`] when shutdown interrupted the wait.
    async fn persist(&self, record: &LogRecord) -> Result<Result<Appended, StoreError>, AmqpError> {
        let store = self.store.as_ref();
        retry_forever(
            "log store append",
            &self.policy,
            self.observer.as_ref(),
            &self.shutdown,
            move || async move {
                match store.append(record).await {
                    Err(err) if err.is_transient() => Err(err),
                    settled => Ok(settled),
                }
            },
        )
        .await
    }
}

#[async_trait]
impl DeliveryHandler for ArchiveConsumer {
    async fn handle(
        &self,
        data: &[u8],
        acker: &dyn Acknowledge,
    ) -> Result<Disposition, AmqpError> {
        let Some(record) = admit("archive", data, &self.validator, acker).await? else {
            return Ok(Disposition::Dropped);
        };

        match self.persist(&record).await {
            Ok(Ok(appended)) => {
                acker.ack().await?;
                match appended {
                    Appended::Inserted => info!(id = %record.id, "log record saved: {}", record.message),
                    Appended::AlreadyPresent => debug!(id = %record.id, "log record already stored"),
                }
                Ok(Disposition::Acked)
            }
            Ok(Err(StoreError::Closed)) | Err(AmqpError::Cancelled) => {
                warn!(id = %record.id, "shutting down, leaving log record for redelivery");
                Ok(Disposition::Deferred)
            }
            Ok(Err(err)) => {
                error!(
                    id = %record.id,
                    error = err.to_string(),
                    raw = %String::from_utf8_lossy(data),
                    "log record cannot be stored, discarding it"
                );
                acker.nack(false).await?;
                Ok(Disposition::Discarded)
            }
            Err(err) => Err(err),
        }
    }
}

/// Alert path: notifies on every valid error or critical record.
pub struct AlertConsumer {
    notifier: Arc<dyn AlertNotifier>,
    validator: LogRecordValidator,
}

impl AlertConsumer {
    pub fn new(notifier: Arc<dyn AlertNotifier>) -> Self {
        AlertConsumer {
            notifier,
            validator: LogRecordValidator::default(),
        }
    }
}

#[async_trait]
impl DeliveryHandler for AlertConsumer {
    async fn handle(
        &self,
        data: &[u8],
        acker: &dyn Acknowledge,
    ) -> Result<Disposition, AmqpError> {
        let Some(record) = admit("alert", data, &self.validator, acker).await? else {
            return Ok(Disposition::Dropped);
        };

        if !record.severity.is_alerting() {
            debug!(id = %record.id, severity = %record.severity, "not an alerting severity");
            acker.ack().await?;
            return Ok(Disposition::Dropped);
        }

        self.notifier.notify(&record).await;
        acker.ack().await?;
        Ok(Disposition::Acked)
    }
}
