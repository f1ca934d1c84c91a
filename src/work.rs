// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Work Queue
//!
//! Point-to-point dispatch of work items through the default exchange, and
//! the consuming side with manual acknowledgment:
//!
//! `Received -> Processing -> Acked | Nacked (no requeue)`
//!
//! A rejected item is never put back on the work queue. The queue's
//! dead-letter policy moves it to the dead-letter queue with its payload
//! intact, where it stays for offline inspection.

use crate::{
    consumer::{Acknowledge, DeliveryHandler, Disposition},
    errors::AmqpError,
    log_publisher::EventLogger,
    log_record::Severity,
    publisher::{PublishMessage, Publisher},
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::Context;
use std::{panic::AssertUnwindSafe, sync::Arc};
use tracing::{info, warn};

/// Result of the business processing of one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Rejected(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn process(&self, payload: &[u8]) -> Outcome;
}

/// Rejects payloads that contain `needle` or are not UTF-8 text.
#[derive(Debug, Clone)]
pub struct RejectContaining {
    needle: String,
}

impl RejectContaining {
    pub fn new(needle: &str) -> Self {
        RejectContaining {
            needle: needle.to_owned(),
        }
    }
}

impl Default for RejectContaining {
    fn default() -> Self {
        RejectContaining::new("0")
    }
}

#[async_trait]
impl WorkHandler for RejectContaining {
    async fn process(&self, payload: &[u8]) -> Outcome {
        let Ok(text) = std::str::from_utf8(payload) else {
            return Outcome::Rejected("payload is not valid UTF-8".to_owned());
        };

        info!(payload = text, "received work item");

        if text.contains(&self.needle) {
            Outcome::Rejected(format!("invalid message content (contains {})", self.needle))
        } else {
            Outcome::Processed
        }
    }
}

/// Publishes work items to the work queue.
pub struct WorkDispatcher {
    publisher: Arc<dyn Publisher>,
    queue: String,
}

impl WorkDispatcher {
    pub fn new(publisher: Arc<dyn Publisher>, queue: &str) -> Self {
        WorkDispatcher {
            publisher,
            queue: queue.to_owned(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Hands `payload` to the broker. Failures are returned as is; the caller
    /// decides whether to re-acquire the session and try again.
    pub async fn publish(&self, payload: &[u8]) -> Result<(), AmqpError> {
        let msg = PublishMessage::new("", &self.queue, payload.to_vec());
        self.publisher.publish(&Context::current(), &msg).await
    }
}

/// Consumes work items, acknowledging processed ones and dead-lettering the
/// rest.
pub struct WorkConsumer<H> {
    handler: H,
    events: Option<Arc<dyn EventLogger>>,
}

impl<H: WorkHandler> WorkConsumer<H> {
    pub fn new(handler: H) -> Self {
        WorkConsumer {
            handler,
            events: None,
        }
    }

    /// Reports every rejection to the log pipeline as an `Error` event.
    pub fn with_events(mut self, events: Arc<dyn EventLogger>) -> Self {
        self.events = Some(events);
        self
    }

    async fn outcome(&self, data: &[u8]) -> Outcome {
        match AssertUnwindSafe(self.handler.process(data))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Rejected("work handler panicked".to_owned()),
        }
    }
}

#[async_trait]
impl<H: WorkHandler> DeliveryHandler for WorkConsumer<H> {
    async fn handle(
        &self,
        data: &[u8],
        acker: &dyn Acknowledge,
    ) -> Result<Disposition, AmqpError> {
        match self.outcome(data).await {
            Outcome::Processed => {
                acker.ack().await?;
                info!("work item processed");
                Ok(Disposition::Acked)
            }
            Outcome::Rejected(reason) => {
                warn!(reason, "processing failed, moving to dlq");

                if let Some(events) = &self.events {
                    events
                        .log("Consumer Processing Error", Severity::Error, Some(reason))
                        .await;
                }

                acker.nack(false).await?;
                Ok(Disposition::DeadLettered)
            }
        }
    }
}
