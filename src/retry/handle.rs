//! The caller's view of a running retry sequence.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::error::RetryError;
use super::task::Sequence;

/// Eventual outcome of a retry sequence.
///
/// Returned immediately by the `submit*` methods of
/// [`RetryExecutor`](crate::RetryExecutor). Awaiting it yields the successful
/// value or a [`RetryError`]. The outcome is assigned exactly once.
///
/// Dropping the handle does not stop the sequence; use
/// [`cancel`](RetryHandle::cancel) for that.
///
/// # Example
///
/// ```rust
/// use retry_executor::{RetryError, RetryExecutor, TokioScheduler};
///
/// # tokio_test::block_on(async {
/// let executor = RetryExecutor::new(TokioScheduler::current()).with_fixed_backoff(60_000);
/// let handle = executor.submit(|| Err::<(), _>("down"));
///
/// let canceller = handle.canceller();
/// canceller.cancel();
///
/// assert_eq!(handle.await, Err(RetryError::Cancelled));
/// # });
/// ```
#[must_use = "dropping a RetryHandle detaches the sequence; await it or cancel it"]
pub struct RetryHandle<T, E> {
    sequence: Arc<Sequence<T, E>>,
}

impl<T, E> RetryHandle<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(sequence: Arc<Sequence<T, E>>) -> Self {
        Self { sequence }
    }

    /// Cancel the sequence.
    ///
    /// A pending retry is unregistered and never runs. An attempt already in
    /// flight finishes, but its result is discarded. Returns false if the
    /// sequence already had an outcome.
    pub fn cancel(&self) -> bool {
        self.sequence.cancel()
    }

    /// A cloneable token that cancels this sequence from elsewhere, e.g.
    /// while the handle itself is being awaited.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            sequence: self.sequence.clone(),
        }
    }

    /// Returns true once the outcome is known.
    pub fn is_finished(&self) -> bool {
        self.sequence.is_finished()
    }
}

impl<T, E> Future for RetryHandle<T, E> {
    type Output = Result<T, RetryError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.sequence.poll_outcome(cx)
    }
}

impl<T, E> fmt::Debug for RetryHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHandle")
            .field("id", &self.sequence.id())
            .field("finished", &self.sequence.is_finished())
            .finish()
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self) -> bool;
    fn id(&self) -> u64;
}

impl<T, E> Cancel for Sequence<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn cancel(&self) -> bool {
        Sequence::cancel(self)
    }

    fn id(&self) -> u64 {
        Sequence::id(self)
    }
}

/// Cancels a retry sequence; obtained from [`RetryHandle::canceller`].
#[derive(Clone)]
pub struct Canceller {
    sequence: Arc<dyn Cancel>,
}

impl Canceller {
    /// Cancel the sequence. Returns false if it already had an outcome.
    pub fn cancel(&self) -> bool {
        self.sequence.cancel()
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("id", &self.sequence.id())
            .finish()
    }
}
