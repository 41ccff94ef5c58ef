//! The resumable retry task.
//!
//! A [`Sequence`] owns everything one submission needs: the work, its
//! [`RetryContext`], a snapshot of the executor configuration and the
//! completion slot observed by the [`RetryHandle`](super::RetryHandle).
//!
//! Each scheduler invocation runs exactly one attempt and then either resolves
//! the sequence or registers exactly one new invocation; there is no recursion
//! and no loop holding a thread between attempts.
//!
//! ```text
//!            schedule(0)            Ok(v)
//! PENDING ──────────────▶ RUNNING ───────▶ SUCCEEDED
//!                          │  ▲
//!              Err, retry  │  │ timer fires
//!                          ▼  │
//!                     SCHEDULED_RETRY
//!
//! RUNNING ── Err, no retry ──▶ PERMANENTLY_FAILED
//! PENDING / SCHEDULED_RETRY ── cancel ──▶ CANCELLED
//! ```
//!
//! All transitions happen under the sequence's lock. Cancellation that races
//! an attempt in flight lets the attempt finish and discards its result.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::time::Instant;
use tracing::Instrument;

use super::backoff::Backoff;
use super::context::RetryContext;
use super::error::{RetryError, RetryExhausted, ScheduleError};
use super::policy::RetryPolicy;
use crate::scheduler::{Job, Registration, Scheduler};

static NEXT_SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

/// One attempt of the user's work.
pub(crate) trait Attempt<T, E>: Send {
    fn call(&mut self, context: &mut RetryContext<E>) -> BoxFuture<'static, Result<T, E>>;
}

/// Work that produces its result synchronously.
pub(crate) struct SyncWork<F>(pub(crate) F);

impl<T, E, F> Attempt<T, E> for SyncWork<F>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut(&mut RetryContext<E>) -> Result<T, E> + Send,
{
    fn call(&mut self, context: &mut RetryContext<E>) -> BoxFuture<'static, Result<T, E>> {
        future::ready((self.0)(context)).boxed()
    }
}

/// Work that returns a future.
pub(crate) struct AsyncWork<F>(pub(crate) F);

impl<T, E, F, Fut> Attempt<T, E> for AsyncWork<F>
where
    F: FnMut(&RetryContext<E>) -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    fn call(&mut self, context: &mut RetryContext<E>) -> BoxFuture<'static, Result<T, E>> {
        (self.0)(&*context).boxed()
    }
}

/// Executor configuration captured at submission.
pub(crate) struct Settings<E> {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) policy: RetryPolicy<E>,
    pub(crate) backoff: Arc<dyn Backoff>,
    pub(crate) fixed_delay: bool,
}

struct Body<T, E> {
    work: Box<dyn Attempt<T, E>>,
    context: RetryContext<E>,
}

enum Phase {
    /// A registration is being made; the scheduler call is in progress.
    Registering { job_dropped: bool },
    /// Waiting for the scheduler to fire.
    Scheduled(Box<dyn Registration>),
    /// An attempt is executing.
    Running,
    /// No job will run again.
    Finished,
}

enum Outcome<T, E> {
    Pending,
    Ready(Result<T, RetryError<E>>),
    Taken,
}

struct State<T, E> {
    /// Bumped by every registration; jobs and scheduler calls carry the value
    /// they were created under.
    epoch: u64,
    phase: Phase,
    body: Option<Body<T, E>>,
    outcome: Outcome<T, E>,
    waker: Option<Waker>,
}

impl<T, E> State<T, E> {
    fn is_resolved(&self) -> bool {
        !matches!(self.outcome, Outcome::Pending)
    }

    /// Single assignment: later resolutions are discarded.
    fn resolve(&mut self, result: Result<T, RetryError<E>>) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.outcome = Outcome::Ready(result);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
        true
    }

    fn finish(&mut self) -> Option<Body<T, E>> {
        self.phase = Phase::Finished;
        self.body.take()
    }
}

/// Shared state of one retry sequence.
pub(crate) struct Sequence<T, E> {
    id: u64,
    settings: Settings<E>,
    started: Instant,
    span: tracing::Span,
    state: Mutex<State<T, E>>,
}

impl<T, E> Sequence<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create the sequence and register its first attempt at zero delay.
    pub(crate) fn start(
        settings: Settings<E>,
        work: Box<dyn Attempt<T, E>>,
        context: RetryContext<E>,
    ) -> Arc<Self> {
        let id = NEXT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed);
        let sequence = Arc::new(Self {
            id,
            settings,
            started: Instant::now(),
            span: tracing::debug_span!("retry", id),
            state: Mutex::new(State {
                epoch: 0,
                phase: Phase::Registering { job_dropped: false },
                body: None,
                outcome: Outcome::Pending,
                waker: None,
            }),
        });
        sequence
            .span
            .in_scope(|| sequence.register(Body { work, context }, Duration::ZERO));
        sequence
    }

    fn job(self: &Arc<Self>, epoch: u64) -> Job {
        let mut guard = JobGuard {
            sequence: self.clone(),
            epoch,
            armed: true,
        };
        let span = self.span.clone();
        async move {
            guard.sequence.clone().run_attempt().await;
            guard.disarm();
        }
        .instrument(span)
        .boxed()
    }

    /// Hand `body` to the scheduler for the next attempt.
    fn register(self: &Arc<Self>, body: Body<T, E>, delay: Duration) {
        let epoch = {
            let mut state = self.lock();
            if state.is_resolved() {
                state.finish();
                return;
            }
            state.epoch += 1;
            state.body = Some(body);
            state.phase = Phase::Registering { job_dropped: false };
            state.epoch
        };

        let registered = self.settings.scheduler.schedule(delay, self.job(epoch));

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.epoch != epoch {
            // the job fired during `schedule` and a later registration owns
            // the phase; this registration has nothing left to run
            return;
        }
        let job_dropped = match state.phase {
            Phase::Registering { job_dropped } => Some(job_dropped),
            Phase::Finished => None,
            // the job already fired and owns the sequence now
            Phase::Running | Phase::Scheduled(_) => return,
        };
        let Some(job_dropped) = job_dropped else {
            // cancelled while registering; the job has not started
            drop(guard);
            if let Ok(registration) = registered {
                registration.cancel();
            }
            return;
        };

        match registered {
            Ok(registration) if !job_dropped => {
                tracing::trace!(delay_ms = delay.as_millis() as u64, "attempt registered");
                state.phase = Phase::Scheduled(registration);
            }
            Ok(_) => self.fail_scheduling(state, ScheduleError::Dropped),
            Err(error) => self.fail_scheduling(state, error),
        }
    }

    fn fail_scheduling(&self, state: &mut State<T, E>, error: ScheduleError) {
        tracing::error!(%error, "failed to schedule retry");
        let last_failure = state.finish().and_then(|mut body| body.context.take_failure());
        state.resolve(Err(RetryError::Scheduler {
            error,
            last_failure,
        }));
    }

    async fn run_attempt(self: Arc<Self>) {
        let mut body = {
            let mut state = self.lock();
            if state.is_resolved() {
                state.finish();
                return;
            }
            let Some(body) = state.body.take() else {
                return;
            };
            state.phase = Phase::Running;
            body
        };

        tracing::trace!(attempt = body.context.attempts(), "running attempt");
        let called =
            std::panic::catch_unwind(AssertUnwindSafe(|| body.work.call(&mut body.context)));
        let result = match called {
            Ok(attempt) => AssertUnwindSafe(attempt).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        self.settle(body, result);
    }

    fn settle(
        self: &Arc<Self>,
        mut body: Body<T, E>,
        result: Result<Result<T, E>, Box<dyn Any + Send>>,
    ) {
        let attempts = body.context.attempts();
        {
            let mut state = self.lock();
            if state.is_resolved() {
                state.finish();
                drop(state);
                tracing::debug!(attempts, "sequence cancelled, discarding attempt result");
                return;
            }
        }

        match result {
            Ok(Ok(value)) => {
                tracing::debug!(attempts, "attempt succeeded");
                self.complete(Ok(value));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(attempts, %message, "work panicked");
                self.complete(Err(RetryError::Panicked { message, attempts }));
            }
            Ok(Err(failure)) => {
                body.context.record_failure(failure);
                if self.settings.policy.should_retry(&body.context) {
                    body.context.advance();
                    let delay = self.next_delay(&body.context);
                    tracing::debug!(
                        attempts,
                        retry = body.context.retry_count(),
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    self.register(body, delay);
                    return;
                }

                tracing::warn!(attempts, "attempt failed, not retrying");
                if let Some(final_error) = body.context.take_failure() {
                    let elapsed = self.started.elapsed();
                    let exhausted = RetryExhausted::new(final_error, attempts, elapsed);
                    self.complete(Err(RetryError::Exhausted(exhausted)));
                }
            }
        }
    }

    fn next_delay(&self, context: &RetryContext<E>) -> Duration {
        let retry_count = if self.settings.fixed_delay {
            1
        } else {
            context.retry_count()
        };
        Duration::from_millis(self.settings.backoff.delay_millis(retry_count))
    }

    fn complete(&self, result: Result<T, RetryError<E>>) {
        let mut state = self.lock();
        state.finish();
        state.resolve(result);
    }

    /// The job registered under `epoch` was dropped without finishing.
    fn job_dropped(&self, epoch: u64) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.epoch != epoch {
            return;
        }
        match state.phase {
            Phase::Registering { .. } => {
                state.phase = Phase::Registering { job_dropped: true };
            }
            Phase::Scheduled(_) | Phase::Running => {
                self.fail_scheduling(state, ScheduleError::Dropped);
            }
            Phase::Finished => {}
        }
    }
}

impl<T, E> Sequence<T, E> {
    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Result<T, RetryError<E>>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        match std::mem::replace(&mut state.outcome, Outcome::Taken) {
            Outcome::Ready(result) => Poll::Ready(result),
            Outcome::Pending => {
                state.outcome = Outcome::Pending;
                let stale = state
                    .waker
                    .as_ref()
                    .is_none_or(|waker| !waker.will_wake(cx.waker()));
                if stale {
                    state.waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
            Outcome::Taken => panic!("RetryHandle polled after completion"),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.lock().is_resolved()
    }

    /// Cancel the sequence. Returns false if it already had an outcome.
    pub(crate) fn cancel(&self) -> bool {
        let _entered = self.span.enter();
        let (registration, body) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if !state.resolve(Err(RetryError::Cancelled)) {
                return false;
            }
            match std::mem::replace(&mut state.phase, Phase::Finished) {
                // the attempt in flight observes the outcome when it settles
                Phase::Running => {
                    state.phase = Phase::Running;
                    (None, None)
                }
                Phase::Scheduled(registration) => (Some(registration), state.body.take()),
                Phase::Registering { .. } | Phase::Finished => (None, state.body.take()),
            }
        };
        if let Some(registration) = registration {
            registration.cancel();
        }
        drop(body);
        tracing::debug!("sequence cancelled");
        true
    }
}

impl<T, E> fmt::Debug for Sequence<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Reports a job the scheduler dropped before it ran to completion.
struct JobGuard<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    sequence: Arc<Sequence<T, E>>,
    epoch: u64,
    armed: bool,
}

impl<T, E> JobGuard<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T, E> Drop for JobGuard<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            self.sequence.job_dropped(self.epoch);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
