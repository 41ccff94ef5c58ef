//! Asynchronous retries with composable policies and backoff.
//!
//! The pieces are small and independent:
//!
//! - [`RetryPolicy`] is plain data that decides, after each failure, whether
//!   another attempt is made
//! - [`Backoff`] maps the retry number to a delay; decorators from
//!   [`BackoffExt`] add clamping and jitter
//! - [`RetryExecutor`] bundles a policy, a backoff and a shared
//!   [`Scheduler`](crate::Scheduler), and turns submitted work into a
//!   [`RetryHandle`]
//!
//! # Quick Start
//!
//! ```rust
//! use retry_executor::{RetryContext, RetryExecutor, TokioScheduler};
//!
//! # tokio_test::block_on(async {
//! let executor = RetryExecutor::new(TokioScheduler::current())
//!     .with_exponential_backoff(1, 2.0)
//!     .with_max_delay(50)
//!     .with_max_retries(3);
//!
//! let handle = executor.submit_with_context(|ctx: &mut RetryContext<String>| {
//!     if ctx.retry_count() < 2 {
//!         Err("connection refused".to_string())
//!     } else {
//!         Ok(ctx.retry_count())
//!     }
//! });
//!
//! assert_eq!(handle.await, Ok(2));
//! # });
//! ```
//!
//! # Delays
//!
//! After the n-th failure the retry count becomes n and the next attempt waits
//! `backoff.delay_millis(n)`. With [`RetryExecutor::with_fixed_delay`] the
//! backoff is always asked for retry 1, so every retry waits the same time.
//!
//! # Outcomes
//!
//! A [`RetryHandle`] resolves exactly once, to `Ok(value)` or to one of the
//! [`RetryError`] variants:
//!
//! - [`RetryError::Exhausted`]: the policy declined to retry; carries the last
//!   failure in a [`RetryExhausted`]
//! - [`RetryError::Scheduler`]: a retry could not be scheduled
//! - [`RetryError::Cancelled`]: the handle was cancelled
//! - [`RetryError::Panicked`]: the work panicked

mod backoff;
mod context;
mod error;
mod executor;
mod handle;
mod policy;
mod random;
mod task;

pub use backoff::{
    Backoff, BackoffExt, ExponentialBackoff, FirstRetryNoDelay, FixedBackoff, MaxDelay, MinDelay,
    ProportionalJitter, UniformJitter, DEFAULT_FIXED_DELAY_MILLIS, DEFAULT_INITIAL_DELAY_MILLIS,
    DEFAULT_JITTER_MULTIPLIER, DEFAULT_JITTER_RANGE_MILLIS, DEFAULT_MAX_DELAY_MILLIS,
    DEFAULT_MIN_DELAY_MILLIS, DEFAULT_MULTIPLIER,
};
pub use context::RetryContext;
pub use error::{RetryError, RetryExhausted, ScheduleError};
pub use executor::RetryExecutor;
pub use handle::{Canceller, RetryHandle};
pub use policy::RetryPolicy;
pub use random::{FixedRandom, RandomSource, SeededRandom, ThreadRandom};

#[cfg(test)]
mod tests;
