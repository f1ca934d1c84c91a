// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Log Event Publisher
//!
//! Services emit structured log events onto the topic exchange under the key
//! `<severity>.<serviceName>`. Losing the logging path must never take the
//! emitting service down, so [`EventLogger::log`] only reports failures
//! locally.

use crate::{
    errors::AmqpError,
    log_record::{LogRecord, Severity},
    publisher::{PublishMessage, Publisher},
    topology::LOGS_EXCHANGE,
};
use async_trait::async_trait;
use opentelemetry::Context;
use std::sync::Arc;
use tracing::{debug, error};

/// Fire-and-forget sink for structured log events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventLogger: Send + Sync {
    async fn log(&self, message: &str, severity: Severity, detail: Option<String>);
}

pub struct LogPublisher {
    publisher: Arc<dyn Publisher>,
    service_name: String,
}

impl LogPublisher {
    pub fn new(publisher: Arc<dyn Publisher>, service_name: &str) -> Self {
        LogPublisher {
            publisher,
            service_name: service_name.to_owned(),
        }
    }

    /// Publishes `record` and reports the outcome.
    pub async fn emit(&self, record: &LogRecord) -> Result<(), AmqpError> {
        let data = record
            .to_vec()
            .map_err(|_| AmqpError::SerializePayloadError)?;

        let msg = PublishMessage::new(LOGS_EXCHANGE, &record.routing_key(), data)
            .json()
            .persistent()
            .msg_type("log");

        self.publisher.publish(&Context::current(), &msg).await
    }
}

#[async_trait]
impl EventLogger for LogPublisher {
    async fn log(&self, message: &str, severity: Severity, detail: Option<String>) {
        let mut record = LogRecord::new(&self.service_name, message, severity);
        if let Some(detail) = detail {
            record = record.with_stack_trace(detail);
        }

        match self.emit(&record).await {
            Ok(()) => debug!(key = %record.routing_key(), "log event published"),
            Err(err) => error!(
                error = err.to_string(),
                event = message,
                "failure to publish log event, dropping it"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::MockPublisher;

    #[tokio::test]
    async fn error_event_is_routed_by_severity_and_service() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .withf(|_, msg| {
                let record = LogRecord::from_slice(&msg.data).unwrap();
                msg.to == "logs_exchange"
                    && msg.key == "error.ConsumerService"
                    && msg.persistent
                    && record.severity == Severity::Error
                    && record.message == "Consumer Processing Error"
                    && record.stack_trace.as_deref() == Some("contains 0")
                    && !record.id.is_nil()
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let logger = LogPublisher::new(Arc::new(publisher), "ConsumerService");
        logger
            .log(
                "Consumer Processing Error",
                Severity::Error,
                Some("contains 0".to_owned()),
            )
            .await;
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed_by_log() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(AmqpError::SessionClosed));

        let logger = LogPublisher::new(Arc::new(publisher), "ProducerService");
        logger.log("Task #1 created", Severity::Info, None).await;
    }

    #[tokio::test]
    async fn emit_reports_publish_failure() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .returning(|_, _| Err(AmqpError::SessionClosed));

        let logger = LogPublisher::new(Arc::new(publisher), "ProducerService");
        let record = LogRecord::new("ProducerService", "Task #1 created", Severity::Info);

        assert_eq!(logger.emit(&record).await, Err(AmqpError::SessionClosed));
    }
}
