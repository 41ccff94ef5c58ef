//! Retry policy: decides whether a failed attempt is retried.

use std::fmt;
use std::sync::Arc;

use super::context::RetryContext;
use crate::kind::{Classify, FailureKind};

type Matcher<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A retry policy describing which failures are retried and how often.
///
/// Policies are immutable values. Every composing method returns a new policy
/// and leaves the receiver untouched, so one base policy can be refined in
/// several directions and shared between threads.
///
/// # Decision order
///
/// [`should_retry`](RetryPolicy::should_retry) evaluates, first match wins:
///
/// 1. no failure recorded yet: retry (the first attempt always runs)
/// 2. an abort predicate accepts the failure: stop
/// 3. the failure's kind is-a registered abort kind: stop
/// 4. an allow-list is registered and nothing on it matches: stop
/// 5. `max_retries` is set and already reached: stop
/// 6. otherwise: retry
///
/// # Examples
///
/// ```rust
/// use retry_executor::{RetryContext, RetryPolicy};
/// use std::io::{Error, ErrorKind};
///
/// let policy = RetryPolicy::<Error>::new()
///     .with_max_retries(3)
///     .retry_for(ErrorKind::TimedOut)
///     .abort_if(|e: &Error| e.to_string().contains("fatal"));
///
/// assert_eq!(policy.max_retries(), Some(3));
/// assert!(policy.should_retry(&RetryContext::new()));
/// ```
pub struct RetryPolicy<E> {
    max_retries: Option<u32>,
    retry_for: Vec<Matcher<E>>,
    abort_for: Vec<Matcher<E>>,
    abort_if: Vec<Matcher<E>>,
}

impl<E: 'static> RetryPolicy<E> {
    /// A policy that retries every failure, without limit.
    pub fn new() -> Self {
        Self {
            max_retries: None,
            retry_for: Vec::new(),
            abort_for: Vec::new(),
            abort_if: Vec::new(),
        }
    }

    /// Allow at most `times` retries (`times + 1` attempts in total).
    ///
    /// ```rust
    /// use retry_executor::RetryPolicy;
    ///
    /// let base = RetryPolicy::<String>::new();
    /// let limited = base.with_max_retries(2);
    ///
    /// assert_eq!(base.max_retries(), None);
    /// assert_eq!(limited.max_retries(), Some(2));
    /// ```
    pub fn with_max_retries(&self, times: u32) -> Self {
        Self {
            max_retries: Some(times),
            ..self.clone()
        }
    }

    /// Never retry: every failure is final.
    pub fn dont_retry(&self) -> Self {
        self.with_max_retries(0)
    }

    /// Retry only failures whose kind is-a `kind` (or another allowed entry).
    ///
    /// The first call turns the policy into an allow-list.
    pub fn retry_for(&self, kind: E::Kind) -> Self
    where
        E: Classify,
    {
        self.retry_for_matching(move |failure: &E| failure.kind().is_a(kind))
    }

    /// Allow-list entry given as a predicate instead of a kind.
    pub fn retry_for_matching<P>(&self, matcher: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let mut next = self.clone();
        next.retry_for.push(Arc::new(matcher));
        next
    }

    /// Stop immediately on failures whose kind is-a `kind`.
    pub fn abort_for(&self, kind: E::Kind) -> Self
    where
        E: Classify,
    {
        let mut next = self.clone();
        next.abort_for
            .push(Arc::new(move |failure: &E| failure.kind().is_a(kind)));
        next
    }

    /// Stop immediately when `predicate` accepts the failure.
    ///
    /// Several predicates may be registered; any one of them aborts.
    pub fn abort_if<P>(&self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let mut next = self.clone();
        next.abort_if.push(Arc::new(predicate));
        next
    }

    /// Get the maximum number of retries, `None` when unlimited.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Decide whether the sequence continues after the failure in `context`.
    pub fn should_retry(&self, context: &RetryContext<E>) -> bool {
        let Some(failure) = context.last_failure() else {
            return true;
        };
        if self.abort_if.iter().any(|abort| abort(failure)) {
            return false;
        }
        if self.abort_for.iter().any(|matches| matches(failure)) {
            return false;
        }
        if !self.retry_for.is_empty() && !self.retry_for.iter().any(|matches| matches(failure)) {
            return false;
        }
        match self.max_retries {
            Some(max) => context.retry_count() < max,
            None => true,
        }
    }
}

impl<E: 'static> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            retry_for: self.retry_for.clone(),
            abort_for: self.abort_for.clone(),
            abort_if: self.abort_if.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("retry_for", &self.retry_for.len())
            .field("abort_for", &self.abort_for.len())
            .field("abort_if", &self.abort_if.len())
            .finish()
    }
}
