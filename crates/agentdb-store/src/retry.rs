use agentdb_types::AgentDbError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::BackendError;

/// Bounded linear backoff: attempt `n` waits `n * base_delay` before retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// The last error seen and how many attempts were made before giving up.
#[derive(Clone, Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: BackendError,
}

impl RetryFailure {
    pub fn into_network_error(self) -> AgentDbError {
        AgentDbError::Network {
            attempts: self.attempts,
            last_error: self.error.to_string(),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() || attempt >= max_attempts => {
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) => {
                let backoff = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %error,
                    backoff_ms = backoff.as_millis() as u64,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&fast(), "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(BackendError::Transient(format!("flaky {n}")))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Transient("down".into()))
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match failure.into_network_error() {
            AgentDbError::Network {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_not_retried() {
        for error in [
            BackendError::NotFound,
            BackendError::Unauthenticated("no space".into()),
            BackendError::Rejected {
                status: 400,
                message: "bad".into(),
            },
        ] {
            let calls = AtomicU32::new(0);
            let counter = &calls;
            let returned = error.clone();
            let result: Result<(), _> = with_retry(&fast(), "test", move || {
                let error = returned.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(error)
                }
            })
            .await;
            let failure = result.unwrap_err();
            assert_eq!(failure.attempts, 1);
            assert_eq!(failure.error, error);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(1),
        };
        let result = with_retry(&policy, "test", || async { Ok::<_, BackendError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
