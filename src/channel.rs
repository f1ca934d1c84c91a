// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Session Management
//!
//! This module owns the single logical connection of a process. A
//! [`ConnectionManager`] opens a connection and one multiplexed channel,
//! retrying with capped exponential backoff until the broker is reachable or
//! shutdown is requested. The resulting [`Session`] is handed explicitly to
//! every component that declares, publishes or consumes.
//!
//! The manager never pushes loss notifications: callers notice a dead session
//! (a failed publish, a closed consumer stream, [`Session::connection_alive`]) and call
//! [`ConnectionManager::acquire`] again.

use crate::{
    backoff::{retry_forever, BackoffPolicy, RetryObserver, TracingRetryObserver},
    config::RabbitMQConfigs,
    errors::AmqpError,
};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One open connection plus the channel used for all broker operations.
#[derive(Clone)]
pub struct Session {
    connection: Arc<Connection>,
    channel: Arc<Channel>,
}

impl Session {
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Whether the underlying connection is still up, regardless of the
    /// channel.
    pub fn connection_alive(&self) -> bool {
        self.connection.status().connected()
    }

    /// Closes the channel and the connection. Unacknowledged deliveries are
    /// returned to their queues by the broker.
    pub async fn close(&self) {
        if self.channel.status().connected() {
            if let Err(err) = self.channel.close(200, "shutdown").await {
                warn!(error = err.to_string(), "failure to close channel");
            }
        }
        if self.connection.status().connected() {
            if let Err(err) = self.connection.close(200, "shutdown").await {
                warn!(error = err.to_string(), "failure to close connection");
            }
        }
        debug!("amqp session closed");
    }
}

/// Opens a connection and a channel in one attempt.
pub async fn new_amqp_channel(
    connection_name: &str,
    cfg: &RabbitMQConfigs,
) -> Result<Session, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(connection_name.to_owned()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            debug!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok(Session {
                connection: Arc::new(conn),
                channel: Arc::new(c),
            })
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError(err.to_string()))
        }
    }
}

/// Establishes sessions to one broker, retrying forever.
pub struct ConnectionManager {
    name: String,
    cfg: RabbitMQConfigs,
    policy: BackoffPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl ConnectionManager {
    pub fn new(name: &str, cfg: RabbitMQConfigs) -> Self {
        ConnectionManager {
            name: name.to_owned(),
            cfg,
            policy: BackoffPolicy::default(),
            observer: Arc::new(TracingRetryObserver),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns a ready session, waiting `min(2^attempt, 30)` seconds between
    /// failed attempts. The only non-success outcome is
    /// [`AmqpError::Cancelled`].
    pub async fn acquire(&self, token: &CancellationToken) -> Result<Session, AmqpError> {
        let session = retry_forever(
            "rabbitmq",
            &self.policy,
            self.observer.as_ref(),
            token,
            || new_amqp_channel(&self.name, &self.cfg),
        )
        .await?;

        info!(host = %self.cfg.host, "connected to rabbitmq");
        Ok(session)
    }
}
