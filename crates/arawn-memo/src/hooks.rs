//! The hook interface shared by sessions and control views.
//!
//! A memoized call never talks to a concrete store. It asks whatever
//! session-like object it was handed to look up a result, to compute one,
//! and to record the outcome. [`Session`](crate::Session) answers these hooks
//! with a real cache; the views in [`views`](crate::views) answer them
//! differently to invalidate, inject or bypass results.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::memoize;

/// A type-erased cached value.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// How a function's cache reacts to a broad invalidation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Persistence {
    /// Cleared by `invalidate_all(None)`.
    #[default]
    Transient,
    /// Survives `invalidate_all(None)`.
    Persistent,
    /// Persistent, and cleared together with every function sharing the key
    /// by `invalidate_by_pkey`.
    Keyed(&'static str),
}

impl Persistence {
    /// Whether the broad sweep skips this function.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::Transient)
    }

    /// The persistence key, if any.
    pub fn pkey(&self) -> Option<&'static str> {
        match self {
            Self::Keyed(pkey) => Some(pkey),
            _ => None,
        }
    }
}

impl From<bool> for Persistence {
    fn from(persistent: bool) -> Self {
        if persistent {
            Self::Persistent
        } else {
            Self::Transient
        }
    }
}

impl From<&'static str> for Persistence {
    fn from(pkey: &'static str) -> Self {
        Self::Keyed(pkey)
    }
}

/// Identity of a memoized function.
///
/// Two ids are equal only if they come from the same wrapped function; the
/// name is for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct FunctionId {
    id: u64,
    name: &'static str,
    persistence: Persistence,
}

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

impl FunctionId {
    /// Id of the built-in function behind `getval` / `putval`.
    pub(crate) const GETTER: FunctionId = FunctionId {
        id: 0,
        name: "getval",
        persistence: Persistence::Persistent,
    };

    pub(crate) fn allocate(name: &'static str, persistence: Persistence) -> Self {
        Self {
            id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
            name,
            persistence,
        }
    }

    /// The function name given at wrap time.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The persistence policy given at wrap time.
    pub fn persistence(&self) -> Persistence {
        self.persistence
    }
}

impl PartialEq for FunctionId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FunctionId {}

impl Hash for FunctionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// A stored call result: a value or the error the body raised.
#[derive(Clone)]
pub enum Outcome {
    /// The body returned a value.
    Success(CachedValue),
    /// The body failed; the error is replayed on every hit.
    Failure(Error),
}

impl Outcome {
    /// Wrap a concrete value.
    pub fn success<T: Any + Send + Sync>(value: T) -> Self {
        Self::Success(Arc::new(value))
    }

    /// Wrap an error.
    pub fn failure(error: Error) -> Self {
        Self::Failure(error)
    }

    /// Whether the call returned a value.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The stored value, if it is a success of type `T`.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Success(value) => Arc::clone(value).downcast::<T>().ok(),
            Self::Failure(_) => None,
        }
    }

    /// The stored error, if this is a failure.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    /// Turn the outcome back into a typed result.
    pub fn into_result<T: Any + Send + Sync>(self, function: FunctionId) -> Result<Arc<T>> {
        match self {
            Self::Success(value) => value.downcast::<T>().map_err(|_| Error::TypeMismatch {
                function: function.name(),
                expected: std::any::type_name::<T>(),
            }),
            Self::Failure(err) => Err(err),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => f.write_str("Success(..)"),
            Self::Failure(err) => f.debug_tuple("Failure").field(err).finish(),
        }
    }
}

/// Answer of the lookup hook.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Replay this outcome without running the body.
    Hit(Outcome),
    /// Nothing stored; compute and record.
    Miss,
    /// Neither compute nor record; the call reports
    /// [`Error::Invalidated`].
    Skip,
}

/// The four hooks every session-like object answers.
///
/// Memoized functions accept `&dyn SessionHooks` as their session argument,
/// so a plain [`Session`](crate::Session) and any control view can be passed
/// at the same call sites.
pub trait SessionHooks: Send + Sync {
    /// Return a stored outcome, or report a miss. Must not run the body.
    fn lookup(&self, function: FunctionId, key: &CacheKey) -> Lookup;

    /// Run the body, handing it the session to use for nested calls.
    ///
    /// Implementations may substitute a different outcome.
    fn compute(&self, function: FunctionId, body: &dyn Fn(&dyn SessionHooks) -> Outcome)
    -> Outcome;

    /// Called after the body produced a value.
    fn record_success(&self, function: FunctionId, key: &CacheKey, value: CachedValue);

    /// Called after the body failed.
    fn record_failure(&self, function: FunctionId, key: &CacheKey, error: Error);
}

/// Direct write access to a cache, used by the control views.
pub trait CacheStore: SessionHooks {
    /// Store an outcome without running anything.
    fn force_outcome(&self, function: FunctionId, key: &CacheKey, outcome: Outcome);

    /// Remove one entry. Returns whether an entry was present.
    fn invalidate_key(&self, function: FunctionId, key: &CacheKey) -> bool;
}

impl<'a> dyn SessionHooks + 'a {
    /// Read a value injected with [`Session::putval`](crate::Session::putval).
    ///
    /// Goes through the normal hooks, so a child session sees its parent's
    /// values and views behave as they do for any memoized call.
    pub fn getval<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        memoize::getter::<T>().call(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_ids_are_unique() {
        let a = FunctionId::allocate("f", Persistence::Transient);
        let b = FunctionId::allocate("f", Persistence::Transient);
        assert_ne!(a, b);
        assert_eq!(a, a);
        assert_ne!(a, FunctionId::GETTER);
    }

    #[test]
    fn test_persistence_conversions() {
        assert_eq!(Persistence::from(false), Persistence::Transient);
        assert_eq!(Persistence::from(true), Persistence::Persistent);
        assert_eq!(Persistence::from("models"), Persistence::Keyed("models"));
        assert!(Persistence::Keyed("models").is_persistent());
        assert!(!Persistence::Transient.is_persistent());
        assert_eq!(Persistence::Keyed("models").pkey(), Some("models"));
        assert_eq!(Persistence::Persistent.pkey(), None);
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = Outcome::success(7u32);
        assert!(ok.is_success());
        assert_eq!(*ok.value::<u32>().unwrap(), 7);
        assert!(ok.value::<String>().is_none());
        assert!(ok.error().is_none());

        let failed = Outcome::failure(Error::NoValue {
            name: "x".to_string(),
        });
        assert!(!failed.is_success());
        assert!(failed.error().unwrap().is_no_value());
    }

    #[test]
    fn test_into_result_reports_type_mismatch() {
        let id = FunctionId::allocate("typed", Persistence::Transient);
        let err = Outcome::success(1u8).into_result::<String>(id).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { function: "typed", .. }));
    }
}
