//! Bounded retry policy for one-time setup operations
//!
//! A `Retrier` makes at most one attempt per `trigger_retry` call and keeps
//! its state between calls. Once an attempt succeeds every later call is a
//! no-op; once the attempt budget is spent (or an attempt fails with a
//! non-retryable error) every later call returns `RetriesExhausted` until
//! `reset` is called.

use crate::{KubemetaError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub name: String,
    pub max_attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// No attempt made yet
    Idle,
    /// Last attempt failed, another one is allowed after the delay
    FailWillRetry,
    /// No further attempts will be made
    PermaFail,
    /// An attempt succeeded
    Ok,
}

#[derive(Debug)]
struct RetryState {
    status: RetryStatus,
    attempts: u32,
    next_attempt: Option<Instant>,
    last_error: Option<String>,
}

impl RetryState {
    fn new() -> Self {
        Self {
            status: RetryStatus::Idle,
            attempts: 0,
            next_attempt: None,
            last_error: None,
        }
    }
}

#[derive(Debug)]
pub struct Retrier {
    policy: RetryPolicy,
    state: Mutex<RetryState>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(RetryState::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn status(&self) -> RetryStatus {
        self.state.lock().await.status
    }

    pub async fn attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }

    /// Forget previous failures and allow a fresh attempt budget
    pub async fn reset(&self) {
        *self.state.lock().await = RetryState::new();
    }

    /// Run `attempt` unless the policy forbids it right now.
    ///
    /// The state lock is held for the duration of the attempt, so concurrent
    /// callers wait for the in-flight attempt instead of starting their own.
    pub async fn trigger_retry<F, Fut>(&self, attempt: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;

        match state.status {
            RetryStatus::Ok => return Ok(()),
            RetryStatus::PermaFail => {
                return Err(KubemetaError::RetriesExhausted {
                    name: self.policy.name.clone(),
                    attempts: state.attempts,
                    last_error: state.last_error.clone().unwrap_or_default(),
                })
            }
            RetryStatus::Idle | RetryStatus::FailWillRetry => {}
        }

        if let Some(next_attempt) = state.next_attempt {
            let now = Instant::now();
            if now < next_attempt {
                return Err(KubemetaError::RetryLater {
                    name: self.policy.name.clone(),
                    remaining: next_attempt - now,
                });
            }
        }

        state.attempts += 1;
        match attempt().await {
            Ok(()) => {
                debug!(name = %self.policy.name, attempts = state.attempts, "Setup succeeded");
                state.status = RetryStatus::Ok;
                state.next_attempt = None;
                state.last_error = None;
                Ok(())
            }
            Err(e) if !e.is_retryable() => {
                warn!(name = %self.policy.name, error = %e, "Setup failed permanently");
                state.status = RetryStatus::PermaFail;
                state.last_error = Some(e.to_string());
                Err(e)
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                if state.attempts >= self.policy.max_attempts {
                    warn!(
                        name = %self.policy.name,
                        attempts = state.attempts,
                        error = %e,
                        "Setup failed, no attempts left"
                    );
                    state.status = RetryStatus::PermaFail;
                } else {
                    debug!(
                        name = %self.policy.name,
                        attempt = state.attempts,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Setup failed, will retry in {:?}",
                        self.policy.delay
                    );
                    state.status = RetryStatus::FailWillRetry;
                    state.next_attempt = Some(Instant::now() + self.policy.delay);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, delay: Duration) -> RetryPolicy {
        RetryPolicy {
            name: "test".to_string(),
            max_attempts,
            delay,
        }
    }

    #[tokio::test]
    async fn test_exhaustion_stops_attempts() {
        let retrier = Retrier::new(policy(10, Duration::ZERO));
        let calls = AtomicU32::new(0);

        for _ in 0..10 {
            let err = retrier
                .trigger_retry(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(KubemetaError::NotReady("empty version".to_string()))
                })
                .await
                .unwrap_err();
            assert!(matches!(err, KubemetaError::NotReady(_)));
        }
        assert_eq!(retrier.status().await, RetryStatus::PermaFail);

        for _ in 0..2 {
            let err = retrier
                .trigger_retry(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap_err();
            match err {
                KubemetaError::RetriesExhausted {
                    attempts,
                    last_error,
                    ..
                } => {
                    assert_eq!(attempts, 10);
                    assert!(last_error.contains("empty version"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_success_is_sticky() {
        let retrier = Retrier::new(policy(3, Duration::ZERO));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            retrier
                .trigger_retry(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retrier.status().await, RetryStatus::Ok);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_fatal() {
        let retrier = Retrier::new(policy(10, Duration::ZERO));

        let err = retrier
            .trigger_retry(|| async { Err(KubemetaError::Forbidden("events".to_string())) })
            .await
            .unwrap_err();
        assert!(matches!(err, KubemetaError::Forbidden(_)));

        let err = retrier.trigger_retry(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(
            err,
            KubemetaError::RetriesExhausted { attempts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_attempts() {
        let retrier = Retrier::new(policy(5, Duration::from_secs(30)));

        let _ = retrier
            .trigger_retry(|| async { Err(KubemetaError::NotReady(String::new())) })
            .await;

        let err = retrier.trigger_retry(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, KubemetaError::RetryLater { .. }));
        assert!(err.is_retryable());
        assert_eq!(retrier.attempts().await, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        retrier.trigger_retry(|| async { Ok(()) }).await.unwrap();
        assert_eq!(retrier.attempts().await, 2);
    }

    #[tokio::test]
    async fn test_reset_allows_new_attempts() {
        let retrier = Retrier::new(policy(1, Duration::ZERO));
        let _ = retrier
            .trigger_retry(|| async { Err(KubemetaError::NotReady(String::new())) })
            .await;
        assert_eq!(retrier.status().await, RetryStatus::PermaFail);

        retrier.reset().await;
        assert_eq!(retrier.status().await, RetryStatus::Idle);
        retrier.trigger_retry(|| async { Ok(()) }).await.unwrap();
    }
}
