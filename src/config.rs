//! Executor configuration as plain data.
//!
//! [`RetryConfig`] describes everything [`RetryExecutor::from_config`] needs
//! apart from the scheduler. With the `serde` feature it can be loaded from any
//! serde format; field names are camelCase.
//!
//! ```rust
//! use retry_executor::{Backoff, BackoffConfig, RetryConfig};
//!
//! let config = RetryConfig {
//!     backoff: BackoffConfig::Exponential {
//!         initial_delay_ms: 100,
//!         multiplier: 2.0,
//!     },
//!     max_delay_ms: Some(1_000),
//!     ..RetryConfig::default()
//! };
//!
//! let backoff = config.build_backoff();
//! assert_eq!(backoff.delay_millis(2), 400);
//! assert_eq!(backoff.delay_millis(8), 1_000);
//! ```
//!
//! [`RetryExecutor::from_config`]: crate::RetryExecutor::from_config

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::retry::{
    Backoff, BackoffExt, ExponentialBackoff, FixedBackoff, RandomSource, ThreadRandom,
    DEFAULT_FIXED_DELAY_MILLIS,
};

/// Base backoff strategy.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")
)]
pub enum BackoffConfig {
    /// Same delay before every retry.
    Fixed {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// `initial_delay_ms * multiplier ^ retry`.
    Exponential {
        /// Delay before retry 0, in milliseconds.
        initial_delay_ms: u64,
        /// Growth factor per retry.
        multiplier: f64,
    },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Fixed {
            delay_ms: DEFAULT_FIXED_DELAY_MILLIS,
        }
    }
}

/// Retry behaviour of an executor.
///
/// Every field is optional in serialized form; missing fields take their
/// [`Default`] values, which match a fresh [`RetryExecutor`](crate::RetryExecutor).
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct RetryConfig {
    /// Retries allowed after the first attempt; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Base backoff strategy.
    pub backoff: BackoffConfig,
    /// Lower bound on every delay.
    pub min_delay_ms: Option<u64>,
    /// Upper bound on every delay.
    pub max_delay_ms: Option<u64>,
    /// Uniform jitter range, applied before the bounds.
    pub uniform_jitter_ms: Option<u64>,
    /// Proportional jitter multiplier, applied before the bounds.
    pub proportional_jitter: Option<f64>,
    /// Run the first retry immediately.
    pub first_retry_no_delay: bool,
    /// Compute every delay as for the first retry.
    ///
    /// Combined with `first_retry_no_delay` every retry runs immediately.
    pub fixed_delay: bool,
}

impl RetryConfig {
    /// Assemble the configured backoff chain, jittered from the thread-local
    /// generator.
    ///
    /// Jitter is applied first, then the min/max bounds, so a configured
    /// bound holds even for jittered delays.
    pub fn build_backoff(&self) -> Arc<dyn Backoff> {
        self.build_backoff_with(Arc::new(ThreadRandom))
    }

    /// Like [`build_backoff`](Self::build_backoff), drawing jitter from `random`.
    pub fn build_backoff_with(&self, random: Arc<dyn RandomSource>) -> Arc<dyn Backoff> {
        let mut backoff: Arc<dyn Backoff> = match self.backoff {
            BackoffConfig::Fixed { delay_ms } => Arc::new(FixedBackoff::new(delay_ms)),
            BackoffConfig::Exponential {
                initial_delay_ms,
                multiplier,
            } => Arc::new(ExponentialBackoff::new(initial_delay_ms, multiplier)),
        };
        if let Some(range) = self.uniform_jitter_ms {
            backoff = Arc::new(backoff.with_uniform_jitter_from(range, random.clone()));
        }
        if let Some(multiplier) = self.proportional_jitter {
            backoff = Arc::new(backoff.with_proportional_jitter_from(multiplier, random));
        }
        if let Some(min) = self.min_delay_ms {
            backoff = Arc::new(backoff.with_min_delay(min));
        }
        if let Some(max) = self.max_delay_ms {
            backoff = Arc::new(backoff.with_max_delay(max));
        }
        if self.first_retry_no_delay {
            backoff = Arc::new(backoff.with_first_retry_no_delay());
        }
        backoff
    }
}
