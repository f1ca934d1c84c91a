// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the exchanges, queues and bindings every participant
//! of the pipeline relies on. The names are a deployment contract shared by
//! producers, the work consumer and the logger service.
//!
//! - `Topology` trait: Interface for topology management
//! - `AmqpTopology`: Declares a set of definitions on a channel
//! - `PipelineTopology`: The concrete log fan-out and dead-letter layout
//!
//! Declaration is idempotent as long as the parameters match what exists on
//! the broker. A conflicting declaration is rejected by the broker and
//! surfaces as a configuration error.

use crate::{
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
    routing::topic_matches,
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

pub const LOGS_EXCHANGE: &str = "logs_exchange";
pub const ALL_LOGS_QUEUE: &str = "all_logs_queue";
pub const CRITICAL_ERRORS_QUEUE: &str = "critical_errors_queue";
pub const ALL_LOGS_PATTERN: &str = "#";
pub const ERROR_LOGS_PATTERN: &str = "error.#";
pub const CRITICAL_LOGS_PATTERN: &str = "critical.#";
pub const DLX_EXCHANGE: &str = "dlx_exchange";
pub const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";
pub const DLQ_ROUTING_KEY: &str = "dlq_key";

/// Trait defining the interface for topology management.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Declares exchanges, then queues, then bindings.
    async fn install(&self) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
pub struct AmqpTopology {
    channel: Arc<Channel>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
}

impl AmqpTopology {
    pub fn new(channel: Arc<Channel>) -> AmqpTopology {
        AmqpTopology {
            channel,
            queues: vec![],
            queues_binding: vec![],
            exchanges: vec![],
        }
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    async fn install(&self) -> Result<(), AmqpError> {
        self.install_exchange().await?;
        self.install_queue().await?;
        self.binding_queues().await
    }
}

impl AmqpTopology {
    async fn install_exchange(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            let opts = ExchangeDeclareOptions {
                passive: false,
                durable: exch.durable,
                auto_delete: false,
                internal: false,
                nowait: false,
            };

            self.channel
                .exchange_declare(&exch.name, exch.kind.into(), opts, FieldTable::default())
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), name = %exch.name, "exchange declaration failed");
                    AmqpError::DeclareExchangeError(exch.name.clone(), err.to_string())
                })?;

            debug!(name = %exch.name, kind = ?exch.kind, durable = exch.durable, "exchange declared");
        }

        Ok(())
    }

    async fn install_queue(&self) -> Result<(), AmqpError> {
        for def in &self.queues {
            let opts = QueueDeclareOptions {
                passive: false,
                durable: def.durable,
                exclusive: false,
                auto_delete: false,
                nowait: false,
            };

            let queue = self
                .channel
                .queue_declare(&def.name, opts, FieldTable::from(queue_arguments(def)))
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), name = %def.name, "queue declaration failed");
                    AmqpError::DeclareQueueError(def.name.clone(), err.to_string())
                })?;

            debug!(
                name = %def.name,
                messages = queue.message_count(),
                dead_letter = def.dead_letter.is_some(),
                "queue declared"
            );
        }

        Ok(())
    }

    async fn binding_queues(&self) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            self.channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|err| {
                    error!(
                        error = err.to_string(),
                        queue = %binding.queue_name,
                        exchange = %binding.exchange_name,
                        "queue binding failed"
                    );
                    AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.clone(),
                        binding.queue_name.clone(),
                    )
                })?;

            debug!(
                queue = %binding.queue_name,
                exchange = %binding.exchange_name,
                pattern = %binding.routing_key,
                "queue bound"
            );
        }

        Ok(())
    }
}

/// Declaration arguments derived from a queue definition.
pub(crate) fn queue_arguments(def: &QueueDefinition) -> BTreeMap<ShortString, AMQPValue> {
    let mut args = BTreeMap::new();

    if let Some(dead_letter) = &def.dead_letter {
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(dead_letter.exchange.clone())),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(dead_letter.routing_key.clone())),
        );
    }

    args
}

/// The full layout: log fan-out over a topic exchange, and a work queue whose
/// rejected messages are parked in a dead-letter queue.
#[derive(Debug, Clone)]
pub struct PipelineTopology {
    work_queue: String,
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueDefinition>,
    bindings: Vec<QueueBinding>,
}

impl PipelineTopology {
    pub fn new(work_queue: &str) -> Self {
        let exchanges = vec![
            ExchangeDefinition::new(LOGS_EXCHANGE).topic().durable(),
            ExchangeDefinition::new(DLX_EXCHANGE).direct().durable(),
        ];

        let queues = vec![
            QueueDefinition::new(ALL_LOGS_QUEUE).durable(),
            QueueDefinition::new(CRITICAL_ERRORS_QUEUE).durable(),
            QueueDefinition::new(DEAD_LETTER_QUEUE).durable(),
            QueueDefinition::new(work_queue).with_dead_letter(DLX_EXCHANGE, DLQ_ROUTING_KEY),
        ];

        let bindings = vec![
            QueueBinding::new(ALL_LOGS_QUEUE)
                .exchange(LOGS_EXCHANGE)
                .routing_key(ALL_LOGS_PATTERN),
            QueueBinding::new(CRITICAL_ERRORS_QUEUE)
                .exchange(LOGS_EXCHANGE)
                .routing_key(ERROR_LOGS_PATTERN),
            QueueBinding::new(CRITICAL_ERRORS_QUEUE)
                .exchange(LOGS_EXCHANGE)
                .routing_key(CRITICAL_LOGS_PATTERN),
            QueueBinding::new(DEAD_LETTER_QUEUE)
                .exchange(DLX_EXCHANGE)
                .routing_key(DLQ_ROUTING_KEY),
        ];

        PipelineTopology {
            work_queue: work_queue.to_owned(),
            exchanges,
            queues,
            bindings,
        }
    }

    pub fn work_queue(&self) -> &str {
        &self.work_queue
    }

    pub fn exchanges(&self) -> &[ExchangeDefinition] {
        &self.exchanges
    }

    pub fn queues(&self) -> &[QueueDefinition] {
        &self.queues
    }

    pub fn bindings(&self) -> &[QueueBinding] {
        &self.bindings
    }

    /// Queues of this layout that a message published to `exchange` with
    /// `routing_key` lands in. The empty exchange name is the broker's
    /// default exchange, which routes by queue name.
    pub fn queues_for(&self, exchange: &str, routing_key: &str) -> Vec<&str> {
        if exchange.is_empty() {
            return self
                .queues
                .iter()
                .filter(|q| q.name == routing_key)
                .map(|q| q.name.as_str())
                .collect();
        }

        let Some(def) = self.exchanges.iter().find(|e| e.name == exchange) else {
            return vec![];
        };

        let mut queues: Vec<&str> = self
            .bindings
            .iter()
            .filter(|b| b.exchange_name == exchange)
            .filter(|b| match def.kind {
                ExchangeKind::Topic => topic_matches(&b.routing_key, routing_key),
                ExchangeKind::Direct => b.routing_key == routing_key,
            })
            .map(|b| b.queue_name.as_str())
            .collect();
        queues.sort_unstable();
        queues.dedup();
        queues
    }

    /// Declares the whole layout on `channel`.
    pub async fn declare(&self, channel: Arc<Channel>) -> Result<(), AmqpError> {
        let mut topology = AmqpTopology::new(channel);
        for def in &self.exchanges {
            topology = topology.exchange(def.clone());
        }
        for def in &self.queues {
            topology = topology.queue(def.clone());
        }
        for binding in &self.bindings {
            topology = topology.queue_binding(binding.clone());
        }
        topology.install().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{log_record::Severity, routing::routing_key};

    #[test]
    fn error_records_reach_both_log_queues() {
        let topology = PipelineTopology::new("work_queue");
        let key = routing_key(Severity::Error, "ServiceX");

        assert_eq!(
            topology.queues_for(LOGS_EXCHANGE, &key),
            vec![ALL_LOGS_QUEUE, CRITICAL_ERRORS_QUEUE]
        );
    }

    #[test]
    fn critical_records_reach_both_log_queues_once() {
        let topology = PipelineTopology::new("work_queue");
        assert_eq!(
            topology.queues_for(LOGS_EXCHANGE, "critical.ServiceX"),
            vec![ALL_LOGS_QUEUE, CRITICAL_ERRORS_QUEUE]
        );
    }

    #[test]
    fn queue_bound_twice_apart_is_reported_once() {
        let mut topology = PipelineTopology::new("work_queue");
        topology.bindings.push(
            QueueBinding::new(ALL_LOGS_QUEUE)
                .exchange(LOGS_EXCHANGE)
                .routing_key("error.*"),
        );

        assert_eq!(
            topology.queues_for(LOGS_EXCHANGE, "error.ServiceX"),
            vec![ALL_LOGS_QUEUE, CRITICAL_ERRORS_QUEUE]
        );
    }

    #[test]
    fn info_and_warning_records_reach_only_the_archive() {
        let topology = PipelineTopology::new("work_queue");
        for severity in [Severity::Info, Severity::Warning] {
            assert_eq!(
                topology.queues_for(LOGS_EXCHANGE, &routing_key(severity, "ServiceX")),
                vec![ALL_LOGS_QUEUE]
            );
        }
    }

    #[test]
    fn dead_letters_land_in_the_parking_queue() {
        let topology = PipelineTopology::new("work_queue");
        assert_eq!(
            topology.queues_for(DLX_EXCHANGE, DLQ_ROUTING_KEY),
            vec![DEAD_LETTER_QUEUE]
        );
        assert!(topology.queues_for(DLX_EXCHANGE, "other").is_empty());
    }

    #[test]
    fn work_items_use_the_default_exchange() {
        let topology = PipelineTopology::new("jobs");
        assert_eq!(topology.queues_for("", "jobs"), vec!["jobs"]);
        assert!(topology.queues_for("", "work_queue").is_empty());
    }

    #[test]
    fn work_queue_dead_letters_to_the_dlx() {
        let topology = PipelineTopology::new("work_queue");
        let work = topology
            .queues()
            .iter()
            .find(|q| q.name() == "work_queue")
            .unwrap();

        let args = queue_arguments(work);
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            Some(&AMQPValue::LongString(LongString::from(DLX_EXCHANGE)))
        );
        assert_eq!(
            args.get(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            Some(&AMQPValue::LongString(LongString::from(DLQ_ROUTING_KEY)))
        );
    }

    #[test]
    fn log_and_dead_letter_declarations_are_durable() {
        let topology = PipelineTopology::new("work_queue");

        assert!(topology.exchanges().iter().all(|e| e.is_durable()));
        for name in [ALL_LOGS_QUEUE, CRITICAL_ERRORS_QUEUE, DEAD_LETTER_QUEUE] {
            let queue = topology.queues().iter().find(|q| q.name() == name).unwrap();
            assert!(queue.is_durable(), "{name}");
            assert!(queue_arguments(queue).is_empty(), "{name}");
        }
        assert_eq!(
            topology
                .exchanges()
                .iter()
                .find(|e| e.name() == LOGS_EXCHANGE)
                .map(|e| e.exchange_kind()),
            Some(ExchangeKind::Topic)
        );
    }
}
