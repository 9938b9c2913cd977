//! Control views: alternate hook implementations over a target store.
//!
//! A view borrows its target and is passed to a memoized function exactly
//! where a session would be. The memoized functions themselves need no
//! special handling.
//!
//! | view            | lookup                         | record            |
//! |-----------------|--------------------------------|-------------------|
//! | [`Invalidating`]| delete the entry, skip the call| delete the entry  |
//! | [`ForceSet`]    | store the forced outcome, hit  | target            |
//! | [`CallOnly`]    | miss                           | nothing           |
//!
//! Scoped suspension is not a view; see [`with_cache_suspended`].

use std::any::Any;

use tracing::debug;

use crate::error::Error;
use crate::hooks::{CacheStore, CachedValue, FunctionId, Lookup, Outcome, SessionHooks};
use crate::key::CacheKey;
use crate::session::Session;

/// Deletes the stored entry of every call made through it.
///
/// The body never runs; the call itself returns
/// [`Error::Invalidated`](crate::Error::Invalidated).
#[derive(Debug)]
pub struct Invalidating<'a, S: CacheStore + ?Sized> {
    target: &'a S,
}

impl<'a, S: CacheStore + ?Sized> Invalidating<'a, S> {
    pub fn new(target: &'a S) -> Self {
        Self { target }
    }
}

impl<S: CacheStore + ?Sized> SessionHooks for Invalidating<'_, S> {
    fn lookup(&self, function: FunctionId, key: &CacheKey) -> Lookup {
        self.target.invalidate_key(function, key);
        Lookup::Skip
    }

    fn compute(
        &self,
        function: FunctionId,
        body: &dyn Fn(&dyn SessionHooks) -> Outcome,
    ) -> Outcome {
        self.target.compute(function, body)
    }

    fn record_success(&self, function: FunctionId, key: &CacheKey, _value: CachedValue) {
        self.target.invalidate_key(function, key);
    }

    fn record_failure(&self, function: FunctionId, key: &CacheKey, _error: Error) {
        self.target.invalidate_key(function, key);
    }
}

impl<S: CacheStore + ?Sized> CacheStore for Invalidating<'_, S> {
    fn force_outcome(&self, function: FunctionId, key: &CacheKey, outcome: Outcome) {
        self.target.force_outcome(function, key, outcome);
    }

    fn invalidate_key(&self, function: FunctionId, key: &CacheKey) -> bool {
        self.target.invalidate_key(function, key)
    }
}

/// Stores a fixed outcome for every call made through it and returns it.
///
/// The body never runs, and a later call through the target sees the same
/// outcome.
#[derive(Debug)]
pub struct ForceSet<'a, S: CacheStore + ?Sized> {
    target: &'a S,
    outcome: Outcome,
}

impl<'a, S: CacheStore + ?Sized> ForceSet<'a, S> {
    pub fn new(target: &'a S, outcome: Outcome) -> Self {
        Self { target, outcome }
    }

    /// The outcome this view injects.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }
}

impl<S: CacheStore + ?Sized> SessionHooks for ForceSet<'_, S> {
    fn lookup(&self, function: FunctionId, key: &CacheKey) -> Lookup {
        debug!(
            function = %function,
            key = %key,
            success = self.outcome.is_success(),
            "Forcing cached result"
        );
        self.target.force_outcome(function, key, self.outcome.clone());
        Lookup::Hit(self.outcome.clone())
    }

    fn compute(
        &self,
        function: FunctionId,
        body: &dyn Fn(&dyn SessionHooks) -> Outcome,
    ) -> Outcome {
        self.target.compute(function, body)
    }

    fn record_success(&self, function: FunctionId, key: &CacheKey, value: CachedValue) {
        self.target.record_success(function, key, value);
    }

    fn record_failure(&self, function: FunctionId, key: &CacheKey, error: Error) {
        self.target.record_failure(function, key, error);
    }
}

impl<S: CacheStore + ?Sized> CacheStore for ForceSet<'_, S> {
    fn force_outcome(&self, function: FunctionId, key: &CacheKey, outcome: Outcome) {
        self.target.force_outcome(function, key, outcome);
    }

    fn invalidate_key(&self, function: FunctionId, key: &CacheKey) -> bool {
        self.target.invalidate_key(function, key)
    }
}

/// Runs the top-level call without consulting or filling the cache.
///
/// Nested calls made by the body go through the target, so they are cached
/// as usual. Use [`with_cache_suspended`] to bypass the whole call tree.
#[derive(Debug)]
pub struct CallOnly<'a, S: CacheStore + ?Sized> {
    target: &'a S,
}

impl<'a, S: CacheStore + ?Sized> CallOnly<'a, S> {
    pub fn new(target: &'a S) -> Self {
        Self { target }
    }
}

impl<S: CacheStore + ?Sized> SessionHooks for CallOnly<'_, S> {
    fn lookup(&self, _function: FunctionId, _key: &CacheKey) -> Lookup {
        Lookup::Miss
    }

    fn compute(
        &self,
        function: FunctionId,
        body: &dyn Fn(&dyn SessionHooks) -> Outcome,
    ) -> Outcome {
        self.target.compute(function, body)
    }

    fn record_success(&self, _function: FunctionId, _key: &CacheKey, _value: CachedValue) {}

    fn record_failure(&self, _function: FunctionId, _key: &CacheKey, _error: Error) {}
}

impl<S: CacheStore + ?Sized> CacheStore for CallOnly<'_, S> {
    fn force_outcome(&self, function: FunctionId, key: &CacheKey, outcome: Outcome) {
        self.target.force_outcome(function, key, outcome);
    }

    fn invalidate_key(&self, function: FunctionId, key: &CacheKey) -> bool {
        self.target.invalidate_key(function, key)
    }
}

/// View that deletes the entry of every call made through it.
pub fn invalidate_view<S: CacheStore + ?Sized>(target: &S) -> Invalidating<'_, S> {
    Invalidating::new(target)
}

/// View that stores and returns `value` for every call made through it.
pub fn force_set_view<S, T>(target: &S, value: T) -> ForceSet<'_, S>
where
    S: CacheStore + ?Sized,
    T: Any + Send + Sync,
{
    ForceSet::new(target, Outcome::success(value))
}

/// View that stores and raises `error` for every call made through it.
pub fn force_failure_view<S: CacheStore + ?Sized>(target: &S, error: Error) -> ForceSet<'_, S> {
    ForceSet::new(target, Outcome::Failure(error))
}

/// View that runs the top-level call without caching it.
pub fn call_only_view<S: CacheStore + ?Sized>(target: &S) -> CallOnly<'_, S> {
    CallOnly::new(target)
}

/// Run `f` with caching suspended on `session`, restoring it on every exit
/// path including panics.
pub fn with_cache_suspended<R>(session: &Session<'_>, f: impl FnOnce() -> R) -> R {
    session.with_cache_suspended(f)
}
