// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Subscriptions
//!
//! A [`RabbitMQSubscriber`] drives one consumer per registered queue on the
//! shared session channel. Each subscription runs in its own task and handles
//! its deliveries one at a time, in delivery order; different subscriptions
//! run concurrently.
//!
//! On shutdown a subscription stops taking new deliveries but lets the one in
//! hand finish. Prefetched deliveries that were never settled are returned to
//! their queue by the broker when the session closes.

use crate::{
    consumer::{consume, DeliveryHandler},
    errors::AmqpError,
};
use futures_util::{future::join_all, Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::global::{self, BoxedTracer};
use std::{fmt::Display, future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A queue paired with the handler for its deliveries.
#[derive(Clone)]
pub struct Subscription {
    pub(crate) queue: String,
    pub(crate) handler: Arc<dyn DeliveryHandler>,
}

pub struct RabbitMQSubscriber {
    channel: Arc<Channel>,
    consumer_name: String,
    prefetch: Option<u16>,
    subscriptions: Vec<Subscription>,
}

impl RabbitMQSubscriber {
    pub fn new(channel: Arc<Channel>, consumer_name: &str) -> Self {
        RabbitMQSubscriber {
            channel,
            consumer_name: consumer_name.to_owned(),
            prefetch: None,
            subscriptions: vec![],
        }
    }

    /// Limits the number of unacknowledged deliveries per consumer.
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn register(mut self, queue: &str, handler: Arc<dyn DeliveryHandler>) -> Self {
        self.subscriptions.push(Subscription {
            queue: queue.to_owned(),
            handler,
        });
        self
    }

    /// Consumes every registered queue until `token` fires or one of the
    /// subscriptions loses the session.
    ///
    /// Returns `Ok(())` after a requested shutdown and
    /// [`AmqpError::SessionLost`] when the broker ended a consumer stream; the
    /// caller is expected to re-acquire the session in that case.
    pub async fn consume_blocking(&self, token: CancellationToken) -> Result<(), AmqpError> {
        if let Some(prefetch) = self.prefetch {
            self.channel
                .basic_qos(prefetch, BasicQosOptions { global: false })
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), "failure to configure qos");
                    AmqpError::QoSDeclarationError(err.to_string())
                })?;
        }

        // Stops the siblings when one subscription dies.
        let local = token.child_token();
        let mut spawns = vec![];

        for (index, sub) in self.subscriptions.iter().enumerate() {
            let tag = format!("{}-{}-{}", self.consumer_name, sub.queue, index);
            let consumer = match self
                .channel
                .basic_consume(
                    &sub.queue,
                    &tag,
                    BasicConsumeOptions {
                        no_local: false,
                        no_ack: false,
                        exclusive: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => consumer,
                Err(err) => {
                    error!(error = err.to_string(), queue = %sub.queue, "failure to create the consumer");
                    stop_all(&local, spawns).await;
                    return Err(AmqpError::ConsumerDeclarationError(sub.queue.clone()));
                }
            };

            info!(queue = %sub.queue, tag, "consuming");
            let sub = sub.clone();
            let token = local.clone();
            spawns.push(tokio::spawn(async move {
                let tracer = global::tracer("amqp consumer");
                let (tracer, sub_ref) = (&tracer, &sub);
                drive(consumer, &sub.queue, token, move |delivery: Delivery| {
                    settle(tracer, sub_ref, delivery)
                })
                .await
            }));
        }

        join(spawns).await
    }
}

/// Stops the spawned subscriptions and waits until each has settled the
/// delivery in hand.
async fn stop_all(token: &CancellationToken, spawns: Vec<JoinHandle<Result<(), AmqpError>>>) {
    token.cancel();
    let _ = join(spawns).await;
}

async fn join(spawns: Vec<JoinHandle<Result<(), AmqpError>>>) -> Result<(), AmqpError> {
    let mut outcome = Ok(());
    for res in join_all(spawns).await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => outcome = Err(err),
            Err(err) => {
                error!(error = err.to_string(), "tokio process error");
                outcome = Err(AmqpError::InternalError);
            }
        }
    }
    outcome
}

async fn settle(tracer: &BoxedTracer, sub: &Subscription, delivery: Delivery) {
    match consume(tracer, &sub.queue, &delivery, sub.handler.as_ref()).await {
        Ok(disposition) => debug!(queue = %sub.queue, ?disposition, "message settled"),
        Err(err) => error!(error = err.to_string(), queue = %sub.queue, "error consume msg"),
    }
}

/// Feeds `deliveries` to `handle` one at a time until `token` fires or the
/// stream fails. A failed or finished stream cancels `token` so sibling
/// subscriptions stop too.
async fn drive<S, D, E, H, Fut>(
    mut deliveries: S,
    queue: &str,
    token: CancellationToken,
    mut handle: H,
) -> Result<(), AmqpError>
where
    S: Stream<Item = Result<D, E>> + Unpin,
    E: Display,
    H: FnMut(D) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                debug!(queue, "subscription stopped");
                return Ok(());
            }
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(delivery)) => handle(delivery).await,
            Some(Err(err)) => {
                warn!(error = err.to_string(), queue, "consumer stream failed");
                token.cancel();
                return Err(AmqpError::SessionLost(queue.to_owned()));
            }
            None => {
                warn!(queue, "consumer stream closed");
                token.cancel();
                return Err(AmqpError::SessionLost(queue.to_owned()));
            }
        }
    }
}
