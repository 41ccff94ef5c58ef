//! The retry executor: immutable configuration plus the `submit*` entry points.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::backoff::{
    Backoff, BackoffExt, ExponentialBackoff, FixedBackoff, DEFAULT_JITTER_MULTIPLIER,
    DEFAULT_JITTER_RANGE_MILLIS,
};
use super::context::RetryContext;
use super::handle::RetryHandle;
use super::policy::RetryPolicy;
use super::random::{RandomSource, ThreadRandom};
use super::task::{AsyncWork, Attempt, Sequence, Settings, SyncWork};
use crate::config::RetryConfig;
use crate::kind::Classify;
use crate::scheduler::Scheduler;

/// Runs fallible work repeatedly until it succeeds or the policy gives up.
///
/// An executor is an immutable bundle of a shared [`Scheduler`], a
/// [`RetryPolicy`], a [`Backoff`] and the fixed-delay flag. Every `with_*`
/// method returns a new executor; the receiver keeps its configuration, so a
/// base executor can be specialised per call site.
///
/// Submitting work never blocks: the first attempt is handed to the scheduler
/// at zero delay, exactly like every retry after it, and a [`RetryHandle`] is
/// returned straight away.
///
/// # Example
///
/// ```rust
/// use retry_executor::{RetryExecutor, TokioScheduler};
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// # tokio_test::block_on(async {
/// let executor = RetryExecutor::new(TokioScheduler::current())
///     .with_exponential_backoff(1, 2.0)
///     .with_max_retries(5);
///
/// let calls = AtomicU32::new(0);
/// let value = executor
///     .submit(move || match calls.fetch_add(1, Ordering::SeqCst) {
///         0 | 1 => Err("not yet"),
///         _ => Ok(42),
///     })
///     .await;
///
/// assert_eq!(value, Ok(42));
/// # });
/// ```
pub struct RetryExecutor<E> {
    scheduler: Arc<dyn Scheduler>,
    policy: RetryPolicy<E>,
    backoff: Arc<dyn Backoff>,
    fixed_delay: bool,
    random: Arc<dyn RandomSource>,
}

impl<E: 'static> RetryExecutor<E> {
    /// An executor on `scheduler` that retries every failure forever, one
    /// second apart.
    pub fn new<S: Scheduler + 'static>(scheduler: S) -> Self {
        Self::from_shared(Arc::new(scheduler))
    }

    /// Like [`new`](Self::new), for a scheduler that is already shared.
    pub fn from_shared(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            policy: RetryPolicy::new(),
            backoff: Arc::new(FixedBackoff::default()),
            fixed_delay: false,
            random: Arc::new(ThreadRandom),
        }
    }

    /// Build an executor from plain configuration data.
    ///
    /// ```rust
    /// use retry_executor::{BackoffConfig, RetryConfig, RetryExecutor, TokioScheduler};
    ///
    /// # tokio_test::block_on(async {
    /// let config = RetryConfig {
    ///     max_retries: Some(2),
    ///     backoff: BackoffConfig::Fixed { delay_ms: 1 },
    ///     ..RetryConfig::default()
    /// };
    /// let executor = RetryExecutor::<String>::from_config(TokioScheduler::current(), &config);
    ///
    /// assert_eq!(executor.retry_policy().max_retries(), Some(2));
    /// # });
    /// ```
    pub fn from_config<S: Scheduler + 'static>(scheduler: S, config: &RetryConfig) -> Self {
        Self::new(scheduler).with_config(config)
    }

    /// Apply `config` on top of this executor.
    ///
    /// The backoff and fixed-delay flag are replaced; the retry limit is set
    /// only when `config` has one. Jitter is drawn from this executor's
    /// [random source](Self::with_random_source).
    pub fn with_config(&self, config: &RetryConfig) -> Self {
        let executor = Self {
            backoff: config.build_backoff_with(self.random.clone()),
            fixed_delay: config.fixed_delay,
            ..self.clone()
        };
        match config.max_retries {
            Some(times) => executor.with_max_retries(times),
            None => executor,
        }
    }

    /// Use another scheduler for future submissions.
    pub fn with_scheduler<S: Scheduler + 'static>(&self, scheduler: S) -> Self {
        Self {
            scheduler: Arc::new(scheduler),
            ..self.clone()
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(&self, policy: RetryPolicy<E>) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    /// Replace the backoff, dropping any decorators added so far.
    pub fn with_backoff<B: Backoff + 'static>(&self, backoff: B) -> Self {
        Self {
            backoff: Arc::new(backoff),
            ..self.clone()
        }
    }

    /// Space retries evenly: every delay is computed as for the first retry.
    ///
    /// With [`with_first_retry_no_delay`](Self::with_first_retry_no_delay) in
    /// the backoff chain that delay is zero, so every retry runs immediately.
    pub fn with_fixed_delay(&self, fixed_delay: bool) -> Self {
        Self {
            fixed_delay,
            ..self.clone()
        }
    }

    /// Use `initial_millis * multiplier^retry` as the base backoff.
    pub fn with_exponential_backoff(&self, initial_millis: u64, multiplier: f64) -> Self {
        self.with_backoff(ExponentialBackoff::new(initial_millis, multiplier))
    }

    /// Use a constant delay as the base backoff.
    pub fn with_fixed_backoff(&self, delay_millis: u64) -> Self {
        self.with_backoff(FixedBackoff::new(delay_millis))
    }

    /// Source of randomness for jitter added after this call.
    pub fn with_random_source<R: RandomSource + 'static>(&self, random: R) -> Self {
        Self {
            random: Arc::new(random),
            ..self.clone()
        }
    }

    /// Add uniform jitter of ±100 ms to the current backoff.
    pub fn with_uniform_jitter(&self) -> Self {
        self.with_uniform_jitter_range(DEFAULT_JITTER_RANGE_MILLIS)
    }

    /// Add uniform jitter of `±range_millis` to the current backoff.
    pub fn with_uniform_jitter_range(&self, range_millis: u64) -> Self {
        let backoff = self
            .backoff
            .clone()
            .with_uniform_jitter_from(range_millis, self.random.clone());
        self.with_backoff(backoff)
    }

    /// Scale the current backoff by a random factor in `[0.9, 1.1]`.
    pub fn with_proportional_jitter(&self) -> Self {
        self.with_proportional_jitter_multiplier(DEFAULT_JITTER_MULTIPLIER)
    }

    /// Scale the current backoff by a random factor in
    /// `[1 - multiplier, 1 + multiplier]`.
    pub fn with_proportional_jitter_multiplier(&self, multiplier: f64) -> Self {
        let backoff = self
            .backoff
            .clone()
            .with_proportional_jitter_from(multiplier, self.random.clone());
        self.with_backoff(backoff)
    }

    /// Clamp the current backoff from below.
    pub fn with_min_delay(&self, min_millis: u64) -> Self {
        self.with_backoff(self.backoff.clone().with_min_delay(min_millis))
    }

    /// Clamp the current backoff from above.
    pub fn with_max_delay(&self, max_millis: u64) -> Self {
        self.with_backoff(self.backoff.clone().with_max_delay(max_millis))
    }

    /// Run the first retry immediately.
    ///
    /// In [fixed-delay](Self::with_fixed_delay) mode every retry is evaluated
    /// as the first one, so all retries run immediately; bound the sequence
    /// with [`with_max_retries`](Self::with_max_retries).
    pub fn with_first_retry_no_delay(&self) -> Self {
        self.with_backoff(self.backoff.clone().with_first_retry_no_delay())
    }

    /// See [`RetryPolicy::with_max_retries`].
    pub fn with_max_retries(&self, times: u32) -> Self {
        self.with_retry_policy(self.policy.with_max_retries(times))
    }

    /// See [`RetryPolicy::dont_retry`].
    pub fn dont_retry(&self) -> Self {
        self.with_retry_policy(self.policy.dont_retry())
    }

    /// See [`RetryPolicy::retry_for`].
    pub fn retry_for(&self, kind: E::Kind) -> Self
    where
        E: Classify,
    {
        self.with_retry_policy(self.policy.retry_for(kind))
    }

    /// See [`RetryPolicy::retry_for_matching`].
    pub fn retry_for_matching<P>(&self, matcher: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.with_retry_policy(self.policy.retry_for_matching(matcher))
    }

    /// See [`RetryPolicy::abort_for`].
    pub fn abort_for(&self, kind: E::Kind) -> Self
    where
        E: Classify,
    {
        self.with_retry_policy(self.policy.abort_for(kind))
    }

    /// See [`RetryPolicy::abort_if`].
    pub fn abort_if<P>(&self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.with_retry_policy(self.policy.abort_if(predicate))
    }

    /// The shared scheduler.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// The retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    /// The backoff, with all decorators applied.
    pub fn backoff(&self) -> &Arc<dyn Backoff> {
        &self.backoff
    }

    /// Whether fixed-delay spacing is on.
    pub fn is_fixed_delay(&self) -> bool {
        self.fixed_delay
    }
}

impl<E: Send + 'static> RetryExecutor<E> {
    /// Retry `work` until it returns `Ok`.
    pub fn submit<T, F>(&self, mut work: F) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        F: FnMut() -> Result<T, E> + Send + 'static,
    {
        self.submit_with_context(move |_: &mut RetryContext<E>| work())
    }

    /// Retry `work`, giving it the [`RetryContext`] of each attempt.
    pub fn submit_with_context<T, F>(&self, work: F) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        F: FnMut(&mut RetryContext<E>) -> Result<T, E> + Send + 'static,
    {
        self.start(Box::new(SyncWork(work)), RetryContext::new())
    }

    /// Retry `work` that has no result beyond success.
    pub fn submit_void<F>(&self, work: F) -> RetryHandle<(), E>
    where
        F: FnMut(&mut RetryContext<E>) -> Result<(), E> + Send + 'static,
    {
        self.submit_with_context(work)
    }

    /// Like [`submit_with_context`](Self::submit_with_context), with `value`
    /// available through [`RetryContext::user_context`] from the first attempt.
    ///
    /// ```rust
    /// use retry_executor::{RetryContext, RetryExecutor, TokioScheduler};
    ///
    /// # tokio_test::block_on(async {
    /// let executor = RetryExecutor::<String>::new(TokioScheduler::current());
    /// let handle = executor.submit_with_user_context("tenant-7", |ctx: &mut RetryContext<String>| {
    ///     Ok(ctx.user_context::<&'static str>().copied())
    /// });
    ///
    /// assert_eq!(handle.await, Ok(Some("tenant-7")));
    /// # });
    /// ```
    pub fn submit_with_user_context<T, U, F>(&self, value: U, work: F) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        U: Any + Send + Sync,
        F: FnMut(&mut RetryContext<E>) -> Result<T, E> + Send + 'static,
    {
        let mut context = RetryContext::new();
        context.set_user_context(value);
        self.start(Box::new(SyncWork(work)), context)
    }

    /// Retry asynchronous work. Each attempt's future is awaited on the
    /// scheduler without blocking a thread.
    ///
    /// ```rust
    /// use retry_executor::{RetryContext, RetryExecutor, TokioScheduler};
    ///
    /// # tokio_test::block_on(async {
    /// let executor = RetryExecutor::new(TokioScheduler::current())
    ///     .with_fixed_backoff(1)
    ///     .with_max_retries(3);
    ///
    /// let handle = executor.submit_async(|ctx: &RetryContext<String>| {
    ///     let retry = ctx.retry_count();
    ///     async move {
    ///         if retry < 2 {
    ///             Err(format!("attempt {} failed", retry + 1))
    ///         } else {
    ///             Ok(retry)
    ///         }
    ///     }
    /// });
    ///
    /// assert_eq!(handle.await, Ok(2));
    /// # });
    /// ```
    pub fn submit_async<T, F, Fut>(&self, work: F) -> RetryHandle<T, E>
    where
        T: Send + 'static,
        F: FnMut(&RetryContext<E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.start(Box::new(AsyncWork(work)), RetryContext::new())
    }

    fn start<T: Send + 'static>(
        &self,
        work: Box<dyn Attempt<T, E>>,
        context: RetryContext<E>,
    ) -> RetryHandle<T, E> {
        let settings = Settings {
            scheduler: self.scheduler.clone(),
            policy: self.policy.clone(),
            backoff: self.backoff.clone(),
            fixed_delay: self.fixed_delay,
        };
        RetryHandle::new(Sequence::start(settings, work, context))
    }
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            policy: self.policy.clone(),
            backoff: self.backoff.clone(),
            fixed_delay: self.fixed_delay,
            random: self.random.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("scheduler", &self.scheduler)
            .field("policy", &self.policy)
            .field("backoff", &self.backoff)
            .field("fixed_delay", &self.fixed_delay)
            .finish()
    }
}
