//! Randomness sources for jitter.
//!
//! Jittered backoffs never call a random number generator directly; they ask a
//! [`RandomSource`] for a sample in `[-1.0, 1.0]` and scale it. Swapping the
//! source makes delay computation reproducible in tests.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A source of uniformly distributed samples in `[-1.0, 1.0]`.
pub trait RandomSource: fmt::Debug + Send + Sync {
    /// Draw the next sample.
    fn signed_unit(&self) -> f64;
}

/// Thread-local generator from `rand`. The default source.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn signed_unit(&self) -> f64 {
        rand::rng().random_range(-1.0..=1.0)
    }
}

/// A seeded generator producing the same sequence for the same seed.
///
/// ```rust
/// use retry_executor::{RandomSource, SeededRandom};
///
/// let a = SeededRandom::new(7);
/// let b = SeededRandom::new(7);
/// assert_eq!(a.signed_unit(), b.signed_unit());
/// ```
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Create a generator from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn signed_unit(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(-1.0..=1.0)
    }
}

/// Always returns the same sample, clamped to `[-1.0, 1.0]`.
///
/// Useful for pinning jitter to the edge of its range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedRandom(f64);

impl FixedRandom {
    /// Create a source returning `value` on every draw.
    pub fn new(value: f64) -> Self {
        Self(value.clamp(-1.0, 1.0))
    }
}

impl RandomSource for FixedRandom {
    fn signed_unit(&self) -> f64 {
        self.0
    }
}
