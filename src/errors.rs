// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Broker Layer
//!
//! `AmqpError` covers every failure the connection, topology, publishing and
//! consuming code can report. Only declaration conflicts are fatal; the
//! supervisor treats everything else as recoverable by re-acquiring the session.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// The session was used after the connection or channel went away
    #[error("session is not open")]
    SessionClosed,

    /// The consumer stream of a queue ended, usually because the session dropped
    #[error("subscription to `{0}` was closed by the broker")]
    SessionLost(String),

    /// The shutdown signal fired before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error binding an exchange to a queue
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error serializing a message payload
    #[error("failure to serialize payload")]
    SerializePayloadError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("failure to declare consumer on `{0}`")]
    ConsumerDeclarationError(String),
}

impl AmqpError {
    /// Errors that retrying cannot fix: the declared topology conflicts with
    /// what already exists on the broker.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AmqpError::DeclareExchangeError(..)
                | AmqpError::DeclareQueueError(..)
                | AmqpError::BindingExchangeToQueueError(..)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_conflicts_are_configuration_errors() {
        assert!(AmqpError::DeclareQueueError("work_queue".into(), "406".into()).is_configuration());
        assert!(AmqpError::DeclareExchangeError("logs_exchange".into(), "406".into())
            .is_configuration());
        assert!(
            AmqpError::BindingExchangeToQueueError("logs_exchange".into(), "q".into())
                .is_configuration()
        );
    }

    #[test]
    fn transient_errors_are_not_configuration_errors() {
        assert!(!AmqpError::ConnectionError("refused".into()).is_configuration());
        assert!(!AmqpError::SessionLost("all_logs_queue".into()).is_configuration());
        assert!(!AmqpError::Cancelled.is_configuration());
    }
}
