//! Error types for memoized calls.

use std::sync::Arc;

/// Error type for memoized calls and session operations.
///
/// Errors are cheap to clone so a stored failure can be replayed on every
/// later hit.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The call arguments could not be turned into a cache key.
    #[error("Cannot build cache key: {reason}")]
    Key { reason: String },

    /// `getval` was called for a name that was never injected.
    #[error("No value injected for {name}")]
    NoValue { name: String },

    /// The memoized body failed.
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),

    /// The stored value is not of the type the caller asked for.
    #[error("Cached value for {function} is not a {expected}")]
    TypeMismatch {
        function: &'static str,
        expected: &'static str,
    },

    /// The call went through an invalidating view, so nothing was computed.
    #[error("Call to {function} was invalidated")]
    Invalidated { function: &'static str },
}

impl Error {
    /// Wrap an arbitrary domain error as a body failure.
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::from_body(err.into())
    }

    /// Convert the error returned by a memoized body.
    ///
    /// Errors that already are an [`Error`] (for example from a nested
    /// memoized call or a `getval`) are recovered as-is.
    pub(crate) fn from_body(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(other) => Self::Failed(Arc::new(other)),
        }
    }

    /// Whether this is a key construction error.
    pub fn is_key(&self) -> bool {
        matches!(self, Self::Key { .. })
    }

    /// Whether this is a missing injected value.
    pub fn is_no_value(&self) -> bool {
        matches!(self, Self::NoValue { .. })
    }

    /// Whether this call was swallowed by an invalidating view.
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Self::Invalidated { .. })
    }

    /// The underlying domain error, if this is a body failure.
    pub fn domain(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for memoized calls.
pub type Result<T> = std::result::Result<T, Error>;
