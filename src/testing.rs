//! Testing utilities for code built on the retry executor.
//!
//! # Examples
//!
//! ## RecordingScheduler
//!
//! ```rust
//! use retry_executor::testing::RecordingScheduler;
//! use retry_executor::{RetryExecutor, TokioScheduler};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let scheduler = RecordingScheduler::new(TokioScheduler::current());
//! let executor = RetryExecutor::new(scheduler.clone())
//!     .with_fixed_backoff(5)
//!     .with_max_retries(2);
//!
//! let _ = executor.submit(|| Err::<(), _>("nope")).await;
//!
//! assert_eq!(
//!     scheduler.retry_delays(),
//!     vec![Duration::from_millis(5), Duration::from_millis(5)]
//! );
//! # });
//! ```
//!
//! ## Assertion Macros
//!
//! ```rust
//! use retry_executor::{assert_retry_exhausted, assert_retry_ok, RetryExecutor, TokioScheduler};
//!
//! # tokio_test::block_on(async {
//! let executor = RetryExecutor::new(TokioScheduler::current()).dont_retry();
//!
//! assert_retry_ok!(executor.submit(|| Ok::<_, &str>(1)).await, 1);
//! assert_retry_exhausted!(executor.submit(|| Err::<i32, _>("down")).await, attempts = 1);
//! # });
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::retry::ScheduleError;
use crate::scheduler::{Job, Registration, Scheduler};

/// Scheduler decorator that records every requested delay.
///
/// Clones share the recording, so keep one clone for assertions and hand the
/// other to the executor.
#[derive(Debug, Clone)]
pub struct RecordingScheduler<S> {
    inner: S,
    delays: Arc<Mutex<Vec<Duration>>>,
    reject_after: Option<usize>,
}

impl<S: Scheduler> RecordingScheduler<S> {
    /// Record registrations and forward them to `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            delays: Arc::new(Mutex::new(Vec::new())),
            reject_after: None,
        }
    }

    /// Accept `registrations` jobs, then reject every further one with
    /// [`ScheduleError::Rejected`]. Rejected requests are not recorded.
    pub fn reject_after(self, registrations: usize) -> Self {
        Self {
            reject_after: Some(registrations),
            ..self
        }
    }

    /// Every delay passed to [`Scheduler::schedule`], in order. The first
    /// entry of each sequence is the zero delay of its first attempt.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delays requested before retries, i.e. all but the first registration.
    ///
    /// Only meaningful when a single sequence ran through this scheduler.
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.delays().into_iter().skip(1).collect()
    }

    /// Number of accepted registrations.
    pub fn registrations(&self) -> usize {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<S: Scheduler> Scheduler for RecordingScheduler<S> {
    fn schedule(&self, delay: Duration, job: Job) -> Result<Box<dyn Registration>, ScheduleError> {
        {
            let mut delays = self.delays.lock().unwrap_or_else(PoisonError::into_inner);
            if self.reject_after.is_some_and(|limit| delays.len() >= limit) {
                return Err(ScheduleError::Rejected(format!(
                    "limit of {} registrations reached",
                    delays.len()
                )));
            }
            delays.push(delay);
        }
        self.inner.schedule(delay, job)
    }
}

/// Assert that a retry outcome is `Ok`, evaluating to the value.
///
/// With a second argument, also asserts the value equals it.
///
/// # Example
///
/// ```rust
/// use retry_executor::{assert_retry_ok, RetryError};
///
/// let outcome: Result<u8, RetryError<String>> = Ok(7);
/// let value = assert_retry_ok!(outcome);
/// assert_eq!(value, 7);
/// ```
#[macro_export]
macro_rules! assert_retry_ok {
    ($outcome:expr) => {
        match $outcome {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got {:?}", e),
        }
    };
    ($outcome:expr, $expected:expr) => {
        match $outcome {
            Ok(value) => assert_eq!(value, $expected),
            Err(e) => panic!("Expected Ok({:?}), got {:?}", $expected, e),
        }
    };
}

/// Assert that a retry outcome is [`RetryError::Exhausted`](crate::RetryError::Exhausted),
/// evaluating to the [`RetryExhausted`](crate::RetryExhausted) it carries.
///
/// `attempts = n` additionally checks the number of attempts made.
///
/// # Example
///
/// ```rust
/// use retry_executor::{assert_retry_exhausted, RetryError, RetryExhausted};
/// use std::time::Duration;
///
/// let outcome: Result<(), RetryError<&str>> =
///     Err(RetryError::Exhausted(RetryExhausted::new("boom", 3, Duration::ZERO)));
/// let exhausted = assert_retry_exhausted!(outcome, attempts = 3);
/// assert_eq!(exhausted.final_error, "boom");
/// ```
#[macro_export]
macro_rules! assert_retry_exhausted {
    ($outcome:expr) => {
        match $outcome {
            Err($crate::RetryError::Exhausted(exhausted)) => exhausted,
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    };
    ($outcome:expr, attempts = $attempts:expr) => {{
        let exhausted = $crate::assert_retry_exhausted!($outcome);
        assert_eq!(
            exhausted.attempts, $attempts,
            "Expected {} attempts, got {}",
            $attempts, exhausted.attempts
        );
        exhausted
    }};
}
