// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Supervision
//!
//! Keeps a process's subscriptions alive across broker outages:
//!
//! 1. acquire a session (backoff forever, abort on shutdown);
//! 2. declare the topology, where a conflict is fatal;
//! 3. consume until shutdown or session loss;
//! 4. close the session and, unless shutting down, start over.

use crate::{
    channel::{ConnectionManager, Session},
    errors::AmqpError,
    subscriber::RabbitMQSubscriber,
    topology::PipelineTopology,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The broker-facing steps of one supervision round.
#[cfg_attr(test, mockall::automock(type Session = u32;))]
#[async_trait]
pub trait SessionLifecycle: Send + Sync {
    type Session: Send + Sync;

    async fn acquire(&self, token: &CancellationToken) -> Result<Self::Session, AmqpError>;

    async fn declare(&self, session: &Self::Session) -> Result<(), AmqpError>;

    /// Whether the connection behind `session` is still up.
    fn connection_alive(&self, session: &Self::Session) -> bool;

    async fn consume(&self, session: &Self::Session, token: &CancellationToken) -> Result<(), AmqpError>;

    async fn close(&self, session: &Self::Session);
}

/// [`SessionLifecycle`] over a real broker connection.
pub struct RabbitMQLifecycle<'a, F> {
    manager: &'a ConnectionManager,
    topology: &'a PipelineTopology,
    subscribe: F,
}

impl<'a, F> RabbitMQLifecycle<'a, F>
where
    F: Fn(&Session) -> RabbitMQSubscriber + Send + Sync,
{
    pub fn new(manager: &'a ConnectionManager, topology: &'a PipelineTopology, subscribe: F) -> Self {
        RabbitMQLifecycle {
            manager,
            topology,
            subscribe,
        }
    }
}

#[async_trait]
impl<'a, F> SessionLifecycle for RabbitMQLifecycle<'a, F>
where
    F: Fn(&Session) -> RabbitMQSubscriber + Send + Sync,
{
    type Session = Session;

    async fn acquire(&self, token: &CancellationToken) -> Result<Session, AmqpError> {
        self.manager.acquire(token).await
    }

    async fn declare(&self, session: &Session) -> Result<(), AmqpError> {
        self.topology.declare(session.channel()).await
    }

    fn connection_alive(&self, session: &Session) -> bool {
        session.connection_alive()
    }

    async fn consume(&self, session: &Session, token: &CancellationToken) -> Result<(), AmqpError> {
        (self.subscribe)(session).consume_blocking(token.clone()).await
    }

    async fn close(&self, session: &Session) {
        session.close().await
    }
}

/// Runs subscriptions built by `subscribe` until `token` fires.
///
/// Returns `Ok(())` after shutdown and an error only for configuration
/// problems that retrying cannot fix.
pub async fn supervise<F>(
    manager: &ConnectionManager,
    topology: &PipelineTopology,
    token: &CancellationToken,
    subscribe: F,
) -> Result<(), AmqpError>
where
    F: Fn(&Session) -> RabbitMQSubscriber + Send + Sync,
{
    run(&RabbitMQLifecycle::new(manager, topology, subscribe), token).await
}

pub async fn run<L: SessionLifecycle>(lifecycle: &L, token: &CancellationToken) -> Result<(), AmqpError> {
    loop {
        let session = match lifecycle.acquire(token).await {
            Ok(session) => session,
            Err(AmqpError::Cancelled) => return Ok(()),
            Err(err) => return Err(err),
        };

        if let Err(err) = lifecycle.declare(&session).await {
            // A live connection means the broker refused the declaration itself.
            let rejected = lifecycle.connection_alive(&session);
            lifecycle.close(&session).await;
            if rejected {
                error!(error = err.to_string(), "topology declaration rejected");
                return Err(err);
            }
            warn!(error = err.to_string(), "connection dropped while declaring, reconnecting");
            continue;
        }

        let result = lifecycle.consume(&session, token).await;
        lifecycle.close(&session).await;

        if token.is_cancelled() {
            info!("subscriptions stopped");
            return Ok(());
        }

        match result {
            Err(err) if err.is_configuration() => return Err(err),
            Err(err) => warn!(error = err.to_string(), "session lost, reconnecting"),
            Ok(()) => warn!("subscriptions ended, reconnecting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    fn conflict() -> AmqpError {
        AmqpError::DeclareQueueError(
            "work_queue".to_owned(),
            "PRECONDITION_FAILED - inequivalent arg 'x-dead-letter-exchange'".to_owned(),
        )
    }

    fn numbered_sessions(lifecycle: &mut MockSessionLifecycle, rounds: usize) {
        let next = Arc::new(AtomicU32::new(0));
        lifecycle
            .expect_acquire()
            .times(rounds)
            .returning(move |_| Ok(next.fetch_add(1, Ordering::SeqCst)));
    }

    #[tokio::test]
    async fn shutdown_while_connecting_is_clean() {
        let mut lifecycle = MockSessionLifecycle::new();
        lifecycle
            .expect_acquire()
            .times(1)
            .returning(|_| Err(AmqpError::Cancelled));
        lifecycle.expect_declare().never();
        lifecycle.expect_close().never();

        assert_eq!(run(&lifecycle, &CancellationToken::new()).await, Ok(()));
    }

    #[tokio::test]
    async fn declaration_rejected_on_a_live_connection_is_fatal() {
        let mut lifecycle = MockSessionLifecycle::new();
        numbered_sessions(&mut lifecycle, 1);
        lifecycle.expect_declare().times(1).returning(|_| Err(conflict()));
        lifecycle.expect_connection_alive().return_const(true);
        lifecycle.expect_close().times(1).return_const(());
        lifecycle.expect_consume().never();

        assert_eq!(run(&lifecycle, &CancellationToken::new()).await, Err(conflict()));
    }

    #[tokio::test]
    async fn declaration_cut_by_a_dropped_connection_reconnects() {
        let token = CancellationToken::new();
        let mut lifecycle = MockSessionLifecycle::new();
        numbered_sessions(&mut lifecycle, 2);
        lifecycle.expect_declare().times(2).returning(|session| {
            if *session == 0 {
                Err(AmqpError::DeclareExchangeError(
                    "logs_exchange".to_owned(),
                    "connection reset".to_owned(),
                ))
            } else {
                Ok(())
            }
        });
        lifecycle.expect_connection_alive().return_const(false);
        lifecycle.expect_close().times(2).return_const(());

        let stop = token.clone();
        lifecycle.expect_consume().times(1).returning(move |session, _| {
            assert_eq!(*session, 1);
            stop.cancel();
            Ok(())
        });

        assert_eq!(run(&lifecycle, &token).await, Ok(()));
    }

    #[tokio::test]
    async fn lost_session_is_reacquired() {
        let token = CancellationToken::new();
        let mut lifecycle = MockSessionLifecycle::new();
        numbered_sessions(&mut lifecycle, 3);
        lifecycle.expect_declare().times(3).returning(|_| Ok(()));
        lifecycle.expect_close().times(3).return_const(());

        let stop = token.clone();
        lifecycle.expect_consume().times(3).returning(move |session, _| match *session {
            0 => Err(AmqpError::SessionLost("all_logs_queue".to_owned())),
            1 => Ok(()),
            _ => {
                stop.cancel();
                Ok(())
            }
        });

        assert_eq!(run(&lifecycle, &token).await, Ok(()));
    }

    #[tokio::test]
    async fn configuration_error_while_consuming_ends_supervision() {
        let mut lifecycle = MockSessionLifecycle::new();
        numbered_sessions(&mut lifecycle, 1);
        lifecycle.expect_declare().returning(|_| Ok(()));
        lifecycle.expect_close().times(1).return_const(());
        lifecycle.expect_consume().times(1).returning(|_, _| Err(conflict()));

        assert_eq!(run(&lifecycle, &CancellationToken::new()).await, Err(conflict()));
    }

    #[tokio::test]
    async fn shutdown_during_consumption_closes_the_session() {
        let token = CancellationToken::new();
        let mut lifecycle = MockSessionLifecycle::new();
        numbered_sessions(&mut lifecycle, 1);
        lifecycle.expect_declare().returning(|_| Ok(()));
        lifecycle.expect_close().times(1).return_const(());

        // A session lost during shutdown is not retried.
        let stop = token.clone();
        lifecycle.expect_consume().times(1).returning(move |_, _| {
            stop.cancel();
            Err(AmqpError::SessionLost("work_queue".to_owned()))
        });

        assert_eq!(run(&lifecycle, &token).await, Ok(()));
    }
}
