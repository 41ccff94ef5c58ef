//! Delayed job scheduling.
//!
//! The executor never sleeps or spawns on its own; every attempt, including
//! the first, is handed to a [`Scheduler`] together with the delay after which
//! it should run. [`TokioScheduler`] implements the contract on a tokio
//! runtime: a delay is a timer inside a spawned task, so no thread is held
//! while a retry is pending.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::retry::ScheduleError;

/// Unit of work handed to a scheduler.
pub type Job = BoxFuture<'static, ()>;

/// A pending job registration.
pub trait Registration: fmt::Debug + Send + Sync {
    /// Prevent the job from running if it has not started yet.
    fn cancel(&self);
}

/// Runs jobs once, after a delay.
///
/// Implementations must either run `job` exactly once after roughly `delay`,
/// or return an error. A job that is dropped without being run is treated as
/// a scheduler failure by the retry sequence that owns it.
pub trait Scheduler: fmt::Debug + Send + Sync {
    /// Register `job` to run after `delay`.
    fn schedule(&self, delay: Duration, job: Job) -> Result<Box<dyn Registration>, ScheduleError>;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, delay: Duration, job: Job) -> Result<Box<dyn Registration>, ScheduleError> {
        (**self).schedule(delay, job)
    }
}

impl Registration for AbortHandle {
    fn cancel(&self) {
        self.abort();
    }
}

/// Scheduler backed by a tokio runtime.
///
/// Clones share the shutdown flag, so shutting down one clone refuses new
/// jobs on all of them. Jobs run on the runtime's worker threads; blocking
/// work blocks the worker for the duration of the attempt.
///
/// # Example
///
/// ```rust
/// use retry_executor::{RetryExecutor, TokioScheduler};
///
/// # tokio_test::block_on(async {
/// let executor = RetryExecutor::new(TokioScheduler::current()).with_max_retries(1);
/// assert_eq!(executor.submit(|| Ok::<_, String>(5)).await, Ok(5));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
    shutdown: Arc<AtomicBool>,
}

impl TokioScheduler {
    /// Schedule onto the runtime behind `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Schedule onto the runtime this call is made from.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime, like [`Handle::current`].
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Like [`current`](Self::current), but reports a missing runtime as an error.
    pub fn try_current() -> Result<Self, ScheduleError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|err| ScheduleError::Rejected(err.to_string()))
    }

    /// Refuse all further jobs. Jobs already registered still run.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: Job) -> Result<Box<dyn Registration>, ScheduleError> {
        if self.is_shutdown() {
            return Err(ScheduleError::Shutdown);
        }
        let task = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            job.await;
        });
        Ok(Box::new(task.abort_handle()))
    }
}
