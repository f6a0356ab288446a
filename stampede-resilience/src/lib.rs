//! Resilience patterns for the stampede orchestrator.
//!
//! Extracted retry-with-backoff so the hot loops (agent health
//! tracking, fleet calls) share one policy instead of re-rolling
//! sleep loops inline.

pub mod backoff;
pub mod retry;

pub use backoff::{BackoffCalculator, BackoffStrategy};
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
