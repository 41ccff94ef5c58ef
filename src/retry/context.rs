//! Per-sequence retry state handed to the work function.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Progress of a single retry sequence.
///
/// A context is created when work is submitted and lives until the sequence
/// reaches a terminal outcome. The executor increments [`retry_count`] and
/// records [`last_failure`] between attempts; work functions can read both
/// and may attach an arbitrary user value that is carried to later attempts.
///
/// [`retry_count`]: RetryContext::retry_count
/// [`last_failure`]: RetryContext::last_failure
///
/// # Example
///
/// ```rust
/// use retry_executor::RetryContext;
///
/// let ctx: RetryContext<String> = RetryContext::new();
/// assert_eq!(ctx.retry_count(), 0);
/// assert!(ctx.is_first_attempt());
/// assert!(ctx.last_failure().is_none());
/// ```
pub struct RetryContext<E> {
    retry_count: u32,
    last_failure: Option<E>,
    user_context: Option<Arc<dyn Any + Send + Sync>>,
}

impl<E> RetryContext<E> {
    /// Create the context for a fresh sequence.
    pub fn new() -> Self {
        Self {
            retry_count: 0,
            last_failure: None,
            user_context: None,
        }
    }

    /// Number of retries performed so far; 0 during the first attempt.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// The failure of the previous attempt, absent on the first attempt.
    pub fn last_failure(&self) -> Option<&E> {
        self.last_failure.as_ref()
    }

    /// True while the first attempt is running.
    pub fn is_first_attempt(&self) -> bool {
        self.retry_count == 0
    }

    /// The caller-supplied value, if one of type `T` was attached.
    ///
    /// ```rust
    /// use retry_executor::RetryContext;
    ///
    /// let mut ctx: RetryContext<()> = RetryContext::new();
    /// ctx.set_user_context("request-17".to_string());
    /// assert_eq!(ctx.user_context::<String>().map(String::as_str), Some("request-17"));
    /// assert!(ctx.user_context::<u32>().is_none());
    /// ```
    pub fn user_context<T: Any>(&self) -> Option<&T> {
        self.user_context
            .as_deref()
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Attach a value that later attempts of this sequence will see.
    pub fn set_user_context<T: Any + Send + Sync>(&mut self, value: T) {
        self.user_context = Some(Arc::new(value));
    }

    /// Record a failed attempt.
    pub(crate) fn record_failure(&mut self, failure: E) {
        self.last_failure = Some(failure);
    }

    /// Move on to the next attempt.
    pub(crate) fn advance(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    pub(crate) fn take_failure(&mut self) -> Option<E> {
        self.last_failure.take()
    }

    /// Attempts made so far, counting the current one.
    pub(crate) fn attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

impl<E> Default for RetryContext<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Debug> fmt::Debug for RetryContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryContext")
            .field("retry_count", &self.retry_count)
            .field("last_failure", &self.last_failure)
            .field("has_user_context", &self.user_context.is_some())
            .finish()
    }
}
