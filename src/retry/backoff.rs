//! Backoff strategies and their decorators.
//!
//! A [`Backoff`] maps the current retry count to a delay in milliseconds.
//! Two base strategies exist ([`FixedBackoff`] and [`ExponentialBackoff`]);
//! everything else is a decorator that wraps another backoff and adjusts its
//! output. Decorators are added through [`BackoffExt`] and compose in any order:
//!
//! ```rust
//! use retry_executor::{Backoff, BackoffExt, ExponentialBackoff};
//!
//! let backoff = ExponentialBackoff::new(100, 2.0)
//!     .with_min_delay(150)
//!     .with_max_delay(1_000);
//!
//! assert_eq!(backoff.delay_millis(0), 150); // 100, raised to the minimum
//! assert_eq!(backoff.delay_millis(2), 400);
//! assert_eq!(backoff.delay_millis(5), 1_000); // 3200, capped
//! ```
//!
//! Jitter decorators draw from a [`RandomSource`], so tests can pin the random
//! component:
//!
//! ```rust
//! use std::sync::Arc;
//! use retry_executor::{Backoff, BackoffExt, FixedBackoff, FixedRandom};
//!
//! let backoff = FixedBackoff::new(1_000)
//!     .with_uniform_jitter_from(100, Arc::new(FixedRandom::new(-1.0)));
//! assert_eq!(backoff.delay_millis(3), 900);
//! ```

use std::fmt;
use std::sync::Arc;

use super::random::{RandomSource, ThreadRandom};

/// Delay used by [`FixedBackoff::default`].
pub const DEFAULT_FIXED_DELAY_MILLIS: u64 = 1_000;
/// Initial delay used by [`ExponentialBackoff::default`].
pub const DEFAULT_INITIAL_DELAY_MILLIS: u64 = 100;
/// Multiplier used by [`ExponentialBackoff::default`].
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Lower bound used when no explicit minimum is given.
pub const DEFAULT_MIN_DELAY_MILLIS: u64 = 100;
/// Upper bound used when no explicit maximum is given.
pub const DEFAULT_MAX_DELAY_MILLIS: u64 = 10_000;
/// Range used by uniform jitter when none is given.
pub const DEFAULT_JITTER_RANGE_MILLIS: u64 = 100;
/// Multiplier used by proportional jitter when none is given.
pub const DEFAULT_JITTER_MULTIPLIER: f64 = 0.1;

/// Computes the delay before a retry.
///
/// `retry_count` is the number of the retry about to be scheduled. Results
/// are never negative; implementations saturate instead of overflowing.
pub trait Backoff: fmt::Debug + Send + Sync {
    /// Delay in milliseconds before retry number `retry_count`.
    fn delay_millis(&self, retry_count: u32) -> u64;
}

impl<B: Backoff + ?Sized> Backoff for Arc<B> {
    fn delay_millis(&self, retry_count: u32) -> u64 {
        (**self).delay_millis(retry_count)
    }
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn delay_millis(&self, retry_count: u32) -> u64 {
        (**self).delay_millis(retry_count)
    }
}

/// The same delay before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    delay_millis: u64,
}

impl FixedBackoff {
    /// Wait `delay_millis` before each retry.
    pub fn new(delay_millis: u64) -> Self {
        Self { delay_millis }
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_FIXED_DELAY_MILLIS)
    }
}

impl Backoff for FixedBackoff {
    fn delay_millis(&self, _retry_count: u32) -> u64 {
        self.delay_millis
    }
}

/// `initial * multiplier ^ retry_count`, saturating at `u64::MAX`.
///
/// ```rust
/// use retry_executor::{Backoff, ExponentialBackoff};
///
/// let backoff = ExponentialBackoff::new(100, 2.0);
/// assert_eq!(backoff.delay_millis(0), 100);
/// assert_eq!(backoff.delay_millis(1), 200);
/// assert_eq!(backoff.delay_millis(3), 800);
/// assert_eq!(backoff.delay_millis(u32::MAX), u64::MAX);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    initial_delay_millis: u64,
    multiplier: f64,
}

impl ExponentialBackoff {
    /// Start at `initial_delay_millis` and multiply by `multiplier` per retry.
    pub fn new(initial_delay_millis: u64, multiplier: f64) -> Self {
        Self {
            initial_delay_millis,
            multiplier,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY_MILLIS, DEFAULT_MULTIPLIER)
    }
}

impl Backoff for ExponentialBackoff {
    fn delay_millis(&self, retry_count: u32) -> u64 {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let delay = self.initial_delay_millis as f64 * self.multiplier.powi(exponent);
        saturating_millis(delay)
    }
}

/// Raises the inner delay to at least a minimum.
#[derive(Debug, Clone)]
pub struct MinDelay<B> {
    inner: B,
    min_millis: u64,
}

impl<B: Backoff> Backoff for MinDelay<B> {
    fn delay_millis(&self, retry_count: u32) -> u64 {
        self.inner.delay_millis(retry_count).max(self.min_millis)
    }
}

/// Caps the inner delay at a maximum.
#[derive(Debug, Clone)]
pub struct MaxDelay<B> {
    inner: B,
    max_millis: u64,
}

impl<B: Backoff> Backoff for MaxDelay<B> {
    fn delay_millis(&self, retry_count: u32) -> u64 {
        self.inner.delay_millis(retry_count).min(self.max_millis)
    }
}

/// Adds a uniformly distributed offset in `[-range, +range]`, floored at 0.
#[derive(Debug, Clone)]
pub struct UniformJitter<B> {
    inner: B,
    range_millis: u64,
    random: Arc<dyn RandomSource>,
}

impl<B: Backoff> Backoff for UniformJitter<B> {
    fn delay_millis(&self, retry_count: u32) -> u64 {
        let base = i128::from(self.inner.delay_millis(retry_count));
        let offset = (self.range_millis as f64 * self.random.signed_unit()).round() as i128;
        let jittered = (base + offset).clamp(0, i128::from(u64::MAX));
        u64::try_from(jittered).unwrap_or(u64::MAX)
    }
}

/// Scales the inner delay by `1 + U(-multiplier, +multiplier)`, floored at 0.
#[derive(Debug, Clone)]
pub struct ProportionalJitter<B> {
    inner: B,
    multiplier: f64,
    random: Arc<dyn RandomSource>,
}

impl<B: Backoff> Backoff for ProportionalJitter<B> {
    fn delay_millis(&self, retry_count: u32) -> u64 {
        let base = self.inner.delay_millis(retry_count) as f64;
        let factor = 1.0 + self.multiplier * self.random.signed_unit();
        saturating_millis(base * factor)
    }
}

/// Retries the first time immediately, then defers to the inner backoff.
#[derive(Debug, Clone)]
pub struct FirstRetryNoDelay<B> {
    inner: B,
}

impl<B: Backoff> Backoff for FirstRetryNoDelay<B> {
    fn delay_millis(&self, retry_count: u32) -> u64 {
        if retry_count <= 1 {
            0
        } else {
            self.inner.delay_millis(retry_count)
        }
    }
}

/// Decorator methods available on every [`Backoff`].
///
/// Each method consumes the receiver and returns a new, wrapping backoff.
pub trait BackoffExt: Backoff + Sized {
    /// Never wait less than `min_millis`.
    fn with_min_delay(self, min_millis: u64) -> MinDelay<Self> {
        MinDelay {
            inner: self,
            min_millis,
        }
    }

    /// Never wait more than `max_millis`.
    fn with_max_delay(self, max_millis: u64) -> MaxDelay<Self> {
        MaxDelay {
            inner: self,
            max_millis,
        }
    }

    /// Add `±range_millis` of uniform jitter using the thread-local generator.
    fn with_uniform_jitter(self, range_millis: u64) -> UniformJitter<Self> {
        self.with_uniform_jitter_from(range_millis, Arc::new(ThreadRandom))
    }

    /// Add `±range_millis` of uniform jitter drawn from `random`.
    fn with_uniform_jitter_from(
        self,
        range_millis: u64,
        random: Arc<dyn RandomSource>,
    ) -> UniformJitter<Self> {
        UniformJitter {
            inner: self,
            range_millis,
            random,
        }
    }

    /// Scale each delay by a random factor in `[1 - multiplier, 1 + multiplier]`.
    fn with_proportional_jitter(self, multiplier: f64) -> ProportionalJitter<Self> {
        self.with_proportional_jitter_from(multiplier, Arc::new(ThreadRandom))
    }

    /// Proportional jitter drawn from `random`.
    fn with_proportional_jitter_from(
        self,
        multiplier: f64,
        random: Arc<dyn RandomSource>,
    ) -> ProportionalJitter<Self> {
        ProportionalJitter {
            inner: self,
            multiplier: multiplier.abs(),
            random,
        }
    }

    /// Make the first retry immediate.
    fn with_first_retry_no_delay(self) -> FirstRetryNoDelay<Self> {
        FirstRetryNoDelay { inner: self }
    }
}

impl<B: Backoff> BackoffExt for B {}

fn saturating_millis(value: f64) -> u64 {
    if value.is_nan() || value >= u64::MAX as f64 {
        u64::MAX
    } else if value <= 0.0 {
        0
    } else {
        value as u64
    }
}
