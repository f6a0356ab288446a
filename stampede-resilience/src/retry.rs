//! Retry policy and executor.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backoff::{BackoffCalculator, BackoffStrategy};

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub backoff_strategy: BackoffStrategy,

    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_strategy: BackoffStrategy::Exponential { base: 2.0 },
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Linear retry policy: delay = `delay` * attempt, no jitter.
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay * max_attempts,
            backoff_strategy: BackoffStrategy::Linear,
            jitter: false,
        }
    }

    /// Calculate delay for a specific attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let calculator = BackoffCalculator::new(
            self.backoff_strategy.clone(),
            self.initial_delay,
            self.max_delay,
            self.jitter,
        );
        calculator.calculate_delay(attempt)
    }
}

/// Trait for errors that can be retried.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Custom retry delay for this error type.
    fn retry_delay(&self) -> Option<Duration> {
        None
    }
}

/// Retry executor.
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn with_default_policy() -> Self {
        Self::new(RetryPolicy::default())
    }

    /// Execute a function with retry logic.
    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            debug!("executing attempt {} of {}", attempt, self.policy.max_attempts);

            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("operation succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if attempt >= self.policy.max_attempts {
                        warn!("operation failed after {} attempts: {}", attempt, error);
                        return Err(RetryError::MaxAttemptsExceeded {
                            attempts: attempt,
                            last_error: error,
                        });
                    }

                    if !error.is_retryable() {
                        warn!("operation failed with non-retryable error: {}", error);
                        return Err(RetryError::NonRetryableError(error));
                    }

                    let delay = error
                        .retry_delay()
                        .unwrap_or_else(|| self.policy.delay_for_attempt(attempt));

                    warn!("attempt {} failed: {}. retrying in {:?}", attempt, error, delay);
                    sleep(delay).await;

                    attempt += 1;
                }
            }
        }
    }
}

/// Retry error types.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("maximum retry attempts ({attempts}) exceeded. last error: {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: E },

    #[error("non-retryable error: {0}")]
    NonRetryableError(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxAttemptsExceeded { last_error, .. } => last_error,
            RetryError::NonRetryableError(error) => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
        message: String,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_strategy: BackoffStrategy::Fixed,
            jitter: false,
        });

        let result = executor
            .execute(|| {
                let count = counter_clone.fetch_add(1, Ordering::Relaxed);
                async move {
                    if count < 2 {
                        Err(TestError {
                            retryable: true,
                            message: "temporary failure".to_string(),
                        })
                    } else {
                        Ok("success".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn retry_stops_at_max_attempts() {
        let executor = RetryExecutor::new(RetryPolicy::linear(2, Duration::from_millis(1)));

        let result: Result<(), RetryError<TestError>> = executor
            .execute(|| async {
                Err(TestError {
                    retryable: true,
                    message: "always fails".to_string(),
                })
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            RetryError::MaxAttemptsExceeded { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let executor = RetryExecutor::with_default_policy();

        let result: Result<(), RetryError<TestError>> = executor
            .execute(|| async {
                Err(TestError {
                    retryable: false,
                    message: "bad input".to_string(),
                })
            })
            .await;

        assert!(matches!(result.unwrap_err(), RetryError::NonRetryableError(_)));
    }
}
