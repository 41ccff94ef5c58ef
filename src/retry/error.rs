//! Error types for retry operations.

use std::time::Duration;

/// Error returned when the policy refuses to retry a failed attempt.
///
/// Contains the final error along with metadata about the retry sequence.
///
/// # Examples
///
/// ```rust
/// use retry_executor::{RetryError, RetryExecutor, TokioScheduler};
///
/// # tokio_test::block_on(async {
/// let executor = RetryExecutor::new(TokioScheduler::current())
///     .with_fixed_backoff(1)
///     .with_max_retries(2);
///
/// match executor.submit(|| Err::<(), _>("always fails")).await {
///     Err(RetryError::Exhausted(exhausted)) => {
///         assert_eq!(exhausted.final_error, "always fails");
///         assert_eq!(exhausted.attempts, 3); // 1 initial + 2 retries
///     }
///     other => panic!("Expected exhaustion, got {:?}", other),
/// }
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// The error from the final attempt.
    pub final_error: E,
    /// Total number of attempts made (initial + retries).
    pub attempts: u32,
    /// Time from submission to the final failure.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Create a new RetryExhausted error.
    pub fn new(final_error: E, attempts: u32, total_duration: Duration) -> Self {
        Self {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Extract the final error, discarding metadata.
    pub fn into_error(self) -> E {
        self.final_error
    }

    /// Get a reference to the final error.
    pub fn error(&self) -> &E {
        &self.final_error
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "retry exhausted after {} attempts ({:?}): {}",
            self.attempts, self.total_duration, self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}

/// A scheduler refused to register a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The scheduler has been shut down.
    Shutdown,
    /// The scheduler dropped a job without running it to completion.
    Dropped,
    /// The scheduler rejected the job for another reason.
    Rejected(String),
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => write!(f, "scheduler is shut down"),
            Self::Dropped => write!(f, "scheduler dropped the job before it completed"),
            Self::Rejected(reason) => write!(f, "scheduler rejected job: {}", reason),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Terminal failure of a retry sequence.
///
/// A [`RetryHandle`](crate::RetryHandle) resolves to `Err(RetryError)` in
/// every outcome other than success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The policy declined to retry; carries the last attempt's failure.
    Exhausted(RetryExhausted<E>),
    /// A retry could not be registered with the scheduler.
    Scheduler {
        /// Why the scheduler refused.
        error: ScheduleError,
        /// Failure of the attempt that preceded the refused registration.
        last_failure: Option<E>,
    },
    /// The handle was cancelled before the sequence finished.
    Cancelled,
    /// The work function panicked.
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
        /// Attempts made, including the one that panicked.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Returns true if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if the policy stopped the sequence.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    /// The last work failure, if the sequence ended with one.
    pub fn last_failure(&self) -> Option<&E> {
        match self {
            Self::Exhausted(exhausted) => Some(&exhausted.final_error),
            Self::Scheduler { last_failure, .. } => last_failure.as_ref(),
            Self::Cancelled | Self::Panicked { .. } => None,
        }
    }

    /// Extract the last work failure, discarding everything else.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Exhausted(exhausted) => Some(exhausted.final_error),
            Self::Scheduler { last_failure, .. } => last_failure,
            Self::Cancelled | Self::Panicked { .. } => None,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted(exhausted) => write!(f, "{}", exhausted),
            Self::Scheduler {
                error,
                last_failure: Some(failure),
            } => write!(f, "{} (last failure: {})", error, failure),
            Self::Scheduler { error, .. } => write!(f, "{}", error),
            Self::Cancelled => write!(f, "retry sequence cancelled"),
            Self::Panicked { message, attempts } => {
                write!(f, "work panicked on attempt {}: {}", attempts, message)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted(exhausted) => Some(&exhausted.final_error),
            Self::Scheduler { error, .. } => Some(error),
            Self::Cancelled | Self::Panicked { .. } => None,
        }
    }
}
