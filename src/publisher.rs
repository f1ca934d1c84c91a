// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module publishes messages to exchanges over the shared session
//! channel, propagating OpenTelemetry context in the message headers.
//! Publishing never waits for consumers; a failure is returned to the caller
//! without retrying.

use crate::{errors::AmqpError, otel};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::ShortString,
    BasicProperties, Channel,
};
use opentelemetry::Context;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type for schema-free text messages
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    /// Exchange name; empty for the default exchange
    pub to: String,
    pub key: String,
    pub data: Vec<u8>,
    pub msg_type: Option<String>,
    pub content_type: String,
    pub persistent: bool,
}

impl PublishMessage {
    pub fn new(to: &str, key: &str, data: Vec<u8>) -> Self {
        PublishMessage {
            to: to.to_owned(),
            key: key.to_owned(),
            data,
            msg_type: None,
            content_type: TEXT_CONTENT_TYPE.to_owned(),
            persistent: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.content_type = JSON_CONTENT_TYPE.to_owned();
        self
    }

    pub fn msg_type(mut self, msg_type: &str) -> Self {
        self.msg_type = Some(msg_type.to_owned());
        self
    }

    /// Asks the broker to write the message to disk on durable queues.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, ctx: &Context, msg: &PublishMessage) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Publisher trait.
pub struct RabbitMQPublisher {
    channel: Arc<Channel>,
}

impl RabbitMQPublisher {
    pub fn new(channel: Arc<Channel>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { channel })
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn publish(&self, ctx: &Context, msg: &PublishMessage) -> Result<(), AmqpError> {
        if !self.channel.status().connected() {
            return Err(AmqpError::SessionClosed);
        }

        let mut props = BasicProperties::default()
            .with_content_type(ShortString::from(msg.content_type.clone()))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(otel::inject_headers(ctx));

        if let Some(msg_type) = &msg.msg_type {
            props = props.with_type(ShortString::from(msg_type.clone()));
        }

        if msg.persistent {
            props = props.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        }

        match self
            .channel
            .basic_publish(
                &msg.to,
                &msg.key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.data,
                props,
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = %msg.to,
                    key = %msg.key,
                    "error publishing message"
                );
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}
