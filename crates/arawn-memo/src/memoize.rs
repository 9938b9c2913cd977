//! Turning a plain function into a memoized one.
//!
//! The body of a memoized function takes the session it was called with
//! plus its arguments. Nested memoized calls must go through that session
//! argument so that views and suspension apply to the whole call tree.
//!
//! ```rust,ignore
//! use std::sync::LazyLock;
//! use arawn_memo::{Memoized, Result, Session, SessionHooks, cached};
//!
//! static FIB: LazyLock<Memoized<u64, u64>> = LazyLock::new(|| {
//!     cached("fib", |s, n: &u64| {
//!         if *n <= 1 {
//!             return Ok(1);
//!         }
//!         Ok(*fib(s, n - 1)? + *fib(s, n - 2)?)
//!     })
//! });
//!
//! fn fib(session: &dyn SessionHooks, n: u64) -> Result<std::sync::Arc<u64>> {
//!     FIB.call(session, &n)
//! }
//!
//! let session = Session::default();
//! assert_eq!(*fib(&session, 5)?, 8);
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::error::{Error, Result};
use crate::hooks::{FunctionId, Lookup, Outcome, Persistence, SessionHooks};
use crate::key::CacheKey;

/// A memoized function.
///
/// `A` is the argument bundle used to build the cache key and `T` is the
/// value type. Calls return `Arc<T>`; whether that is a fresh copy or the
/// stored value depends on the duplication policy chosen at wrap time.
pub struct Memoized<A: ?Sized, T> {
    id: FunctionId,
    duplicate: Option<fn(&T) -> T>,
    record_failures: bool,
    body: Box<dyn Fn(&dyn SessionHooks, &A) -> anyhow::Result<T> + Send + Sync>,
}

impl<A, T> Memoized<A, T>
where
    A: Serialize + ?Sized,
    T: Any + Send + Sync,
{
    /// Wrap `body`, returning the stored value itself on every hit.
    pub fn by_ref<F>(name: &'static str, persistence: impl Into<Persistence>, body: F) -> Self
    where
        F: Fn(&dyn SessionHooks, &A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::with_id(FunctionId::allocate(name, persistence.into()), None, body)
    }

    fn with_id<F>(id: FunctionId, duplicate: Option<fn(&T) -> T>, body: F) -> Self
    where
        F: Fn(&dyn SessionHooks, &A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            id,
            duplicate,
            record_failures: true,
            body: Box::new(body),
        }
    }

    /// Identity of this function in every session.
    pub fn id(&self) -> FunctionId {
        self.id
    }

    /// Name given at wrap time, used in logs and errors.
    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    /// Whether hits return a fresh copy of the stored value.
    pub fn duplicates(&self) -> bool {
        self.duplicate.is_some()
    }

    /// Cache key for a call with these arguments.
    pub fn key(&self, args: &A) -> Result<CacheKey> {
        CacheKey::build(args)
    }

    /// Call through `session`.
    ///
    /// On a hit the stored outcome is replayed without running the body. On
    /// a miss the body runs via [`SessionHooks::compute`] and its outcome is
    /// recorded. Key construction errors are returned before any hook runs.
    pub fn call(&self, session: &dyn SessionHooks, args: &A) -> Result<Arc<T>> {
        let key = self.key(args)?;

        match session.lookup(self.id, &key) {
            Lookup::Hit(outcome) => {
                trace!(function = %self.id, key = %key, "Memo hit");
                return self.replay(outcome);
            }
            Lookup::Skip => {
                trace!(function = %self.id, key = %key, "Memo call skipped");
                return Err(Error::Invalidated {
                    function: self.name(),
                });
            }
            Lookup::Miss => {
                trace!(function = %self.id, key = %key, "Memo miss");
            }
        }

        match session.compute(self.id, &|s| self.run(s, args)) {
            Outcome::Success(value) => {
                session.record_success(self.id, &key, Arc::clone(&value));
                self.replay(Outcome::Success(value))
            }
            Outcome::Failure(err) => {
                if self.record_failures {
                    session.record_failure(self.id, &key, err.clone());
                }
                Err(err)
            }
        }
    }

    fn run(&self, session: &dyn SessionHooks, args: &A) -> Outcome {
        match (self.body)(session, args) {
            Ok(value) => Outcome::success(value),
            Err(err) => Outcome::Failure(Error::from_body(err)),
        }
    }

    fn replay(&self, outcome: Outcome) -> Result<Arc<T>> {
        let value = outcome.into_result::<T>(self.id)?;
        Ok(match self.duplicate {
            Some(duplicate) => Arc::new(duplicate(&value)),
            None => value,
        })
    }
}

impl<A, T> Memoized<A, T>
where
    A: Serialize + ?Sized,
    T: Clone + Any + Send + Sync,
{
    /// Wrap `body`, returning a fresh clone of the stored value on every call.
    pub fn duplicating<F>(name: &'static str, persistence: impl Into<Persistence>, body: F) -> Self
    where
        F: Fn(&dyn SessionHooks, &A) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self::with_id(
            FunctionId::allocate(name, persistence.into()),
            Some(T::clone),
            body,
        )
    }
}

impl<A: ?Sized, T> fmt::Debug for Memoized<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("id", &self.id)
            .field("duplicate", &self.duplicate.is_some())
            .field("record_failures", &self.record_failures)
            .finish_non_exhaustive()
    }
}

/// Memoize with duplication and no persistence.
pub fn cached<A, T, F>(name: &'static str, body: F) -> Memoized<A, T>
where
    A: Serialize + ?Sized,
    T: Clone + Any + Send + Sync,
    F: Fn(&dyn SessionHooks, &A) -> anyhow::Result<T> + Send + Sync + 'static,
{
    Memoized::duplicating(name, Persistence::Transient, body)
}

/// Memoize by reference with no persistence.
pub fn rcached<A, T, F>(name: &'static str, body: F) -> Memoized<A, T>
where
    A: Serialize + ?Sized,
    T: Any + Send + Sync,
    F: Fn(&dyn SessionHooks, &A) -> anyhow::Result<T> + Send + Sync + 'static,
{
    Memoized::by_ref(name, Persistence::Transient, body)
}

/// General form: pick the duplication and persistence policies.
///
/// Reference mode does not need `T: Clone`; use [`Memoized::by_ref`] for
/// values that cannot be cloned.
pub fn gcached<A, T, F>(
    name: &'static str,
    by_ref: bool,
    persistence: impl Into<Persistence>,
    body: F,
) -> Memoized<A, T>
where
    A: Serialize + ?Sized,
    T: Clone + Any + Send + Sync,
    F: Fn(&dyn SessionHooks, &A) -> anyhow::Result<T> + Send + Sync + 'static,
{
    if by_ref {
        Memoized::by_ref(name, persistence, body)
    } else {
        Memoized::duplicating(name, persistence, body)
    }
}

/// The function behind `getval`: persistent, by reference, and always
/// failing unless a value was injected. Its failure is not recorded.
pub(crate) fn getter<T: Any + Send + Sync>() -> Memoized<str, T> {
    let mut getter = Memoized::with_id(FunctionId::GETTER, None, |_, name: &str| {
        Err(Error::NoValue {
            name: name.to_string(),
        }
        .into())
    });
    getter.record_failures = false;
    getter
}

/// Cache key used by `getval` / `putval` for `name`.
pub(crate) fn getter_key(name: &str) -> Result<CacheKey> {
    CacheKey::build(name)
}
