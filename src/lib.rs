//! # retry-executor
//!
//! Run fallible work again and again, asynchronously, until it succeeds or a
//! policy says stop.
//!
//! Work is submitted to a [`RetryExecutor`], which hands every attempt to a
//! shared [`Scheduler`] and immediately returns a [`RetryHandle`]. No thread
//! waits while a retry is pending: the delay is a timer registration and the
//! next attempt runs when it fires.
//!
//! - **Policies** ([`RetryPolicy`]) are immutable data: a retry limit, an
//!   allow-list of failure kinds, abort kinds and abort predicates
//! - **Backoff** ([`Backoff`]) is a chain: a fixed or exponential base wrapped
//!   by min/max clamps and uniform or proportional jitter
//! - **Handles** ([`RetryHandle`]) are futures that resolve exactly once and can
//!   be cancelled at any time
//!
//! ## Quick Example
//!
//! ```rust
//! use retry_executor::{RetryError, RetryExecutor, TokioScheduler};
//! use std::io::{Error, ErrorKind};
//!
//! # tokio_test::block_on(async {
//! let executor = RetryExecutor::<Error>::new(TokioScheduler::current())
//!     .with_fixed_backoff(1)
//!     .with_max_retries(3)
//!     .abort_for(ErrorKind::PermissionDenied);
//!
//! let result = executor
//!     .submit(|| Err::<(), _>(Error::new(ErrorKind::PermissionDenied, "no access")))
//!     .await;
//!
//! match result {
//!     Err(RetryError::Exhausted(exhausted)) => assert_eq!(exhausted.attempts, 1),
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! # });
//! ```
//!
//! Runnable demos live in the `demos/` directory.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod kind;
pub mod retry;
pub mod scheduler;
pub mod testing;

// Re-exports
pub use config::{BackoffConfig, RetryConfig};
pub use kind::{Classify, FailureKind};
pub use retry::{
    Backoff, BackoffExt, Canceller, ExponentialBackoff, FirstRetryNoDelay, FixedBackoff,
    FixedRandom, MaxDelay, MinDelay, ProportionalJitter, RandomSource, RetryContext, RetryError,
    RetryExecutor, RetryExhausted, RetryHandle, RetryPolicy, ScheduleError, SeededRandom,
    ThreadRandom, UniformJitter,
};
pub use scheduler::{Job, Registration, Scheduler, TokioScheduler};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{BackoffConfig, RetryConfig};
    pub use crate::kind::{Classify, FailureKind};
    pub use crate::retry::{
        Backoff, BackoffExt, RetryContext, RetryError, RetryExecutor, RetryExhausted,
        RetryHandle, RetryPolicy,
    };
    pub use crate::scheduler::{Scheduler, TokioScheduler};
}
