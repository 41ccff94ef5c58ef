//! Failure classification.
//!
//! Retry policies decide by *kind* rather than by message. A kind is a small
//! `Copy` value (usually a fieldless enum) that may name a parent kind, which
//! gives "is-a" matching: registering `Io` in an allow-list also admits
//! `Timeout` when `Timeout`'s parent is `Io`.
//!
//! # Example
//!
//! ```rust
//! use retry_executor::{Classify, FailureKind};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Kind {
//!     Io,
//!     Timeout,
//!     Parse,
//! }
//!
//! impl FailureKind for Kind {
//!     fn parent(self) -> Option<Self> {
//!         match self {
//!             Kind::Timeout => Some(Kind::Io),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! assert!(Kind::Timeout.is_a(Kind::Io));
//! assert!(!Kind::Io.is_a(Kind::Timeout));
//! assert!(!Kind::Parse.is_a(Kind::Io));
//! ```

use std::fmt::Debug;

/// A category of failure with an optional parent category.
///
/// The parent chain must be acyclic.
pub trait FailureKind: Copy + Eq + Debug + Send + Sync + 'static {
    /// The more general kind this one specializes, if any.
    fn parent(self) -> Option<Self> {
        None
    }

    /// Returns true if `self` is `ancestor` or a descendant of it.
    fn is_a(self, ancestor: Self) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

/// An error type whose values can be classified by [`FailureKind`].
pub trait Classify {
    /// The kind hierarchy used for this error type.
    type Kind: FailureKind;

    /// The kind of this particular failure.
    fn kind(&self) -> Self::Kind;
}

impl FailureKind for std::io::ErrorKind {}

impl Classify for std::io::Error {
    type Kind = std::io::ErrorKind;

    fn kind(&self) -> Self::Kind {
        std::io::Error::kind(self)
    }
}
