// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Capped Exponential Backoff
//!
//! Retries an operation forever with a delay of `min(2^attempt, max)` seconds
//! after the `attempt`-th failure, until it succeeds or the shutdown token
//! fires. Every failure is reported to a [`RetryObserver`]; none of them is
//! ever treated as fatal here.

use crate::errors::AmqpError;
use std::{fmt::Display, future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Delay policy: `base^attempt` seconds, clamped to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: u32,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: 2,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.base.checked_pow(attempt) {
            Some(secs) => Duration::from_secs(u64::from(secs)).min(self.max),
            None => self.max,
        }
    }
}

/// Receives one notification per failed attempt.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, what: &str, attempt: u32, delay: Duration, error: &str);
}

/// Reports retries as warnings on the local log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, what: &str, attempt: u32, delay: Duration, error: &str) {
        warn!(
            operation = what,
            attempt,
            delay_secs = delay.as_secs(),
            error,
            "{} unavailable, retrying in {}s",
            what,
            delay.as_secs()
        );
    }
}

/// Runs `op` until it succeeds.
///
/// Returns [`AmqpError::Cancelled`] as soon as `token` fires, including while
/// an attempt or a backoff wait is outstanding.
pub async fn retry_forever<T, E, F, Fut>(
    what: &str,
    policy: &BackoffPolicy,
    observer: &dyn RetryObserver,
    token: &CancellationToken,
    mut op: F,
) -> Result<T, AmqpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            _ = token.cancelled() => return Err(AmqpError::Cancelled),
            result = op() => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        attempt = attempt.saturating_add(1);
        let delay = policy.delay(attempt);
        observer.on_retry(what, attempt, delay, &err.to_string());

        tokio::select! {
            _ = token.cancelled() => return Err(AmqpError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    };
    use tokio::time::Instant;

    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub(crate) retries: Mutex<Vec<(u32, Duration, String)>>,
    }

    impl RetryObserver for RecordingObserver {
        fn on_retry(&self, _what: &str, attempt: u32, delay: Duration, error: &str) {
            self.retries
                .lock()
                .unwrap()
                .push((attempt, delay, error.to_owned()));
        }
    }

    #[test]
    fn delay_doubles_then_caps_at_thirty_seconds() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=8).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30, 30]);
    }

    #[test]
    fn delay_is_monotonic_and_never_overflows() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..200 {
            let delay = policy.delay(attempt);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_then_success_reports_three_backoffs() {
        let observer = RecordingObserver::default();
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let started = Instant::now();

        let result = retry_forever("broker", &BackoffPolicy::default(), &observer, &token, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err("connection refused")
                } else {
                    Ok("session")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("session"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let retries = observer.retries.lock().unwrap().clone();
        let delays: Vec<u64> = retries.iter().map(|(_, d, _)| d.as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8]);
        assert!(retries.iter().all(|(_, _, e)| e == "connection refused"));
        assert_eq!(started.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_a_pending_backoff() {
        let observer = RecordingObserver::default();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let result: Result<(), AmqpError> =
            retry_forever("broker", &BackoffPolicy::default(), &observer, &token, || async {
                Err::<(), _>("unreachable")
            })
            .await;

        assert_eq!(result, Err(AmqpError::Cancelled));
        // 2s and 4s waits started; the second one was interrupted.
        assert_eq!(observer.retries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn already_cancelled_token_returns_immediately() {
        let observer = RecordingObserver::default();
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<(), AmqpError> =
            retry_forever("broker", &BackoffPolicy::default(), &observer, &token, || {
                std::future::pending::<Result<(), String>>()
            })
            .await;

        assert_eq!(result, Err(AmqpError::Cancelled));
        assert!(observer.retries.lock().unwrap().is_empty());
    }
}
