// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Handling
//!
//! Every delivery is settled explicitly: acknowledged, negatively
//! acknowledged (with or without requeue), or left unsettled so the broker
//! redelivers it after the session closes. Handlers report which of these
//! they chose through [`Disposition`]; the acknowledgment itself goes through
//! the [`Acknowledge`] seam so handlers can be exercised without a broker.

use crate::{errors::AmqpError, otel};
use async_trait::async_trait;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::borrow::Cow;
use tracing::{debug, error};

/// Settles a single delivery with the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Positive acknowledgment: the broker forgets the message.
    async fn ack(&self) -> Result<(), AmqpError>;

    /// Negative acknowledgment. With `requeue = false` the queue's
    /// dead-letter policy applies.
    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl Acknowledge for Acker {
    async fn ack(&self) -> Result<(), AmqpError> {
        Acker::ack(self, BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "failure to ack message");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await
        .map(|_| ())
        .map_err(|err| {
            error!(error = err.to_string(), "failure to nack message");
            AmqpError::NackMessageError
        })
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed and acknowledged.
    Acked,
    /// Acknowledged without processing (malformed or invalid payload).
    Dropped,
    /// Rejected without requeue; the broker moves it to the dead-letter queue.
    DeadLettered,
    /// Rejected without requeue from a queue with no dead-letter policy; the
    /// broker discards it.
    Discarded,
    /// Neither acknowledged nor rejected because the process is shutting
    /// down; the broker redelivers it when the session closes.
    Deferred,
}

impl Disposition {
    fn is_failure(&self) -> bool {
        !matches!(self, Disposition::Acked)
    }
}

/// Processes the payload of one delivery and settles it through `acker`.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, data: &[u8], acker: &dyn Acknowledge)
        -> Result<Disposition, AmqpError>;
}

/// Runs `handler` on `delivery` inside a consumer span.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: &Delivery,
    handler: &dyn DeliveryHandler,
) -> Result<Disposition, AmqpError> {
    let (_ctx, mut span) = otel::new_span(&delivery.properties, tracer, queue);

    debug!(
        queue,
        delivery_tag = delivery.delivery_tag,
        redelivered = delivery.redelivered,
        "received message"
    );

    let result = handler.handle(&delivery.data, &delivery.acker).await;

    match &result {
        Ok(disposition) if disposition.is_failure() => {
            span.set_status(Status::Error {
                description: Cow::from(format!("{disposition:?}")),
            });
        }
        Ok(_) => span.set_status(Status::Ok),
        Err(err) => {
            span.record_error(err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });
        }
    }
    span.end();

    result
}
