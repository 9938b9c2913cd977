//! Hierarchical memo store.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::hooks::{CacheStore, CachedValue, FunctionId, Lookup, Outcome, Persistence, SessionHooks};
use crate::key::CacheKey;
use crate::memoize::{Memoized, getter_key};
use crate::views::{CallOnly, ForceSet, Invalidating};

/// Stored outcomes of one function.
#[derive(Debug)]
struct FunctionCache {
    /// Copied from the function id when the cache is created.
    persistence: Persistence,

    entries: HashMap<CacheKey, Outcome>,
}

impl FunctionCache {
    fn new(persistence: Persistence) -> Self {
        Self {
            persistence,
            entries: HashMap::new(),
        }
    }
}

/// A memo session.
///
/// Holds one cache per memoized function, created on the first write. A
/// child session falls back to its parent on a local miss but only ever
/// writes to itself.
///
/// The lock only guards the maps. Two threads computing the same call
/// through a shared session both run the body; give each unit of work its
/// own child session instead.
pub struct Session<'p> {
    config: SessionConfig,
    parent: Option<&'p dyn SessionHooks>,
    functions: RwLock<HashMap<FunctionId, FunctionCache>>,
    suspended: AtomicUsize,
}

impl Default for Session<'_> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<'p> Session<'p> {
    /// Create a session, optionally nested under `parent`.
    pub fn new(parent: Option<&'p dyn SessionHooks>) -> Self {
        Self::with_config(SessionConfig::default(), parent)
    }

    /// Create a session with an explicit configuration.
    pub fn with_config(config: SessionConfig, parent: Option<&'p dyn SessionHooks>) -> Self {
        Self {
            config,
            parent,
            functions: RwLock::new(HashMap::new()),
            suspended: AtomicUsize::new(0),
        }
    }

    /// Create a child of this session.
    pub fn child(&self) -> Session<'_> {
        Session::with_config(self.config.clone(), Some(self))
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Session name from the config, used in logs.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether this session falls back to a parent.
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Invalidation
    // ─────────────────────────────────────────────────────────────────────

    /// Drop the stored result of one call. Missing entries are ignored.
    pub fn invalidate<A, T>(&self, function: &Memoized<A, T>, args: &A) -> Result<bool>
    where
        A: Serialize + ?Sized,
        T: Any + Send + Sync,
    {
        let key = function.key(args)?;
        Ok(self.invalidate_key(function.id(), &key))
    }

    /// Drop stored results.
    ///
    /// With a function, its whole cache is dropped whatever its persistence.
    /// Without one, every non-persistent cache is dropped. Returns the number
    /// of entries removed.
    pub fn invalidate_all(&self, function: Option<FunctionId>) -> usize {
        let mut functions = self.functions.write();
        let removed = match function {
            Some(function) => functions
                .remove(&function)
                .map_or(0, |cache| cache.entries.len()),
            None => {
                let mut removed = 0;
                functions.retain(|_, cache| {
                    if cache.persistence.is_persistent() {
                        true
                    } else {
                        removed += cache.entries.len();
                        false
                    }
                });
                removed
            }
        };
        debug!(
            session = %self.config.name,
            function = function.map(|f| f.name()),
            removed,
            "Invalidated cached results"
        );
        removed
    }

    /// Drop every cache whose function was wrapped with persistence key `pkey`.
    pub fn invalidate_by_pkey(&self, pkey: &str) -> usize {
        let mut removed = 0;
        self.functions.write().retain(|_, cache| {
            if cache.persistence.pkey() == Some(pkey) {
                removed += cache.entries.len();
                false
            } else {
                true
            }
        });
        debug!(session = %self.config.name, pkey, removed, "Invalidated by persistence key");
        removed
    }

    // ─────────────────────────────────────────────────────────────────────
    // Direct writes
    // ─────────────────────────────────────────────────────────────────────

    /// Store `value` as the result of a call without running the body.
    pub fn force_set<A, T>(&self, function: &Memoized<A, T>, args: &A, value: T) -> Result<()>
    where
        A: Serialize + ?Sized,
        T: Any + Send + Sync,
    {
        let key = function.key(args)?;
        self.force_outcome(function.id(), &key, Outcome::success(value));
        Ok(())
    }

    /// Store `error` as the result of a call without running the body.
    pub fn force_set_failure<A, T>(
        &self,
        function: &Memoized<A, T>,
        args: &A,
        error: Error,
    ) -> Result<()>
    where
        A: Serialize + ?Sized,
        T: Any + Send + Sync,
    {
        let key = function.key(args)?;
        self.force_outcome(function.id(), &key, Outcome::Failure(error));
        Ok(())
    }

    /// Use the session as a key-value store: inject `value` under `name`.
    pub fn putval<T: Any + Send + Sync>(&self, value: T, name: &str) -> Result<()> {
        let key = getter_key(name)?;
        self.force_outcome(FunctionId::GETTER, &key, Outcome::success(value));
        Ok(())
    }

    /// Read a value injected with [`Session::putval`], here or in a parent.
    pub fn getval<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        (self as &dyn SessionHooks).getval(name)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Views
    // ─────────────────────────────────────────────────────────────────────

    /// View that deletes the entry of every call made through it.
    pub fn invalidating(&self) -> Invalidating<'_, Self> {
        Invalidating::new(self)
    }

    /// View that stores and returns `value` for every call made through it.
    pub fn forcing<T: Any + Send + Sync>(&self, value: T) -> ForceSet<'_, Self> {
        ForceSet::new(self, Outcome::success(value))
    }

    /// View that stores and raises `error` for every call made through it.
    pub fn forcing_failure(&self, error: Error) -> ForceSet<'_, Self> {
        ForceSet::new(self, Outcome::Failure(error))
    }

    /// View that runs the top-level call without caching it.
    pub fn call_only(&self) -> CallOnly<'_, Self> {
        CallOnly::new(self)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Suspension
    // ─────────────────────────────────────────────────────────────────────

    /// Suspend caching until the returned guard is dropped.
    ///
    /// While suspended every lookup misses and nothing is stored, for every
    /// call made through this session. Guards nest.
    pub fn suspend(&self) -> SuspendGuard<'_, 'p> {
        let depth = self.suspended.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(session = %self.config.name, depth, "Caching suspended");
        SuspendGuard { session: self }
    }

    /// Run `f` with caching suspended.
    pub fn with_cache_suspended<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.suspend();
        f()
    }

    /// Whether a suspension guard is live on this session.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────

    /// Number of locally stored entries across all functions.
    pub fn len(&self) -> usize {
        self.functions
            .read()
            .values()
            .map(|cache| cache.entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of locally stored entries for `function`.
    pub fn entry_count(&self, function: FunctionId) -> usize {
        self.functions
            .read()
            .get(&function)
            .map_or(0, |cache| cache.entries.len())
    }

    /// Whether an entry is stored locally, ignoring the parent.
    pub fn contains(&self, function: FunctionId, key: &CacheKey) -> bool {
        self.peek(function, key).is_some()
    }

    /// Local entry for a call, ignoring the parent and suspension.
    pub fn peek(&self, function: FunctionId, key: &CacheKey) -> Option<Outcome> {
        self.functions
            .read()
            .get(&function)
            .and_then(|cache| cache.entries.get(key))
            .cloned()
    }

    /// Get session statistics.
    pub fn stats(&self) -> SessionStats {
        let functions = self.functions.read();
        SessionStats {
            functions: functions.len(),
            entries: functions.values().map(|cache| cache.entries.len()).sum(),
            persistent_functions: functions
                .values()
                .filter(|cache| cache.persistence.is_persistent())
                .count(),
            suspended: self.suspended.load(Ordering::SeqCst),
        }
    }

    // Injected values are not memoized results, so suspension leaves them alone.
    fn caching_suspended_for(&self, function: FunctionId) -> bool {
        function != FunctionId::GETTER && self.is_suspended()
    }

    fn store(&self, function: FunctionId, key: &CacheKey, outcome: Outcome) {
        if self.caching_suspended_for(function) {
            trace!(session = %self.config.name, function = %function, "Store skipped while suspended");
            return;
        }
        let mut functions = self.functions.write();
        let cache = functions
            .entry(function)
            .or_insert_with(|| FunctionCache::new(function.persistence()));
        cache.entries.insert(key.clone(), outcome);
        trace!(
            session = %self.config.name,
            function = %function,
            key = %key,
            size = cache.entries.len(),
            "Stored result"
        );
    }
}

impl SessionHooks for Session<'_> {
    fn lookup(&self, function: FunctionId, key: &CacheKey) -> Lookup {
        if self.caching_suspended_for(function) {
            return Lookup::Miss;
        }
        if let Some(outcome) = self.peek(function, key) {
            return Lookup::Hit(outcome);
        }
        match self.parent {
            Some(parent) => parent.lookup(function, key),
            None => Lookup::Miss,
        }
    }

    fn compute(
        &self,
        _function: FunctionId,
        body: &dyn Fn(&dyn SessionHooks) -> Outcome,
    ) -> Outcome {
        body(self)
    }

    fn record_success(&self, function: FunctionId, key: &CacheKey, value: CachedValue) {
        self.store(function, key, Outcome::Success(value));
    }

    fn record_failure(&self, function: FunctionId, key: &CacheKey, error: Error) {
        if self.config.cache_failures {
            self.store(function, key, Outcome::Failure(error));
        }
    }
}

impl CacheStore for Session<'_> {
    fn force_outcome(&self, function: FunctionId, key: &CacheKey, outcome: Outcome) {
        self.store(function, key, outcome);
    }

    fn invalidate_key(&self, function: FunctionId, key: &CacheKey) -> bool {
        let removed = self
            .functions
            .write()
            .get_mut(&function)
            .and_then(|cache| cache.entries.remove(key))
            .is_some();
        if removed {
            debug!(session = %self.config.name, function = %function, key = %key, "Invalidated result");
        }
        removed
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("has_parent", &self.parent.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Restores the suspension counter when dropped, including on unwind.
#[must_use = "caching resumes as soon as the guard is dropped"]
pub struct SuspendGuard<'s, 'p> {
    session: &'s Session<'p>,
}

impl Drop for SuspendGuard<'_, '_> {
    fn drop(&mut self) {
        let depth = self.session.suspended.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(session = %self.session.config.name, depth, "Caching resumed");
    }
}

/// Session statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Functions with a local cache.
    pub functions: usize,

    /// Locally stored entries.
    pub entries: usize,

    /// Local caches exempt from the broad sweep.
    pub persistent_functions: usize,

    /// Current suspension depth.
    pub suspended: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memoize::{Memoized, cached, gcached};

    fn square() -> Memoized<u32, u32> {
        cached("square", |_, n: &u32| Ok(n * n))
    }

    #[test]
    fn test_write_creates_function_cache_lazily() {
        let session = Session::default();
        let f = square();
        assert_eq!(session.stats().functions, 0);

        f.call(&session, &3).unwrap();
        assert_eq!(session.entry_count(f.id()), 1);
        assert_eq!(session.stats().functions, 1);
        assert!(session.contains(f.id(), &f.key(&3).unwrap()));
    }

    #[test]
    fn test_invalidate_ignores_missing() {
        let session = Session::default();
        let f = square();
        assert!(!session.invalidate(&f, &3).unwrap());

        f.call(&session, &3).unwrap();
        assert!(session.invalidate(&f, &3).unwrap());
        assert!(session.is_empty());
    }

    #[test]
    fn test_sweep_respects_persistence() {
        let session = Session::default();
        let transient = square();
        let pinned: Memoized<u32, u32> = gcached("pinned", false, true, |_, n| Ok(*n));
        let keyed: Memoized<u32, u32> = gcached("keyed", false, "tables", |_, n| Ok(*n));

        for n in 0..3 {
            transient.call(&session, &n).unwrap();
            pinned.call(&session, &n).unwrap();
            keyed.call(&session, &n).unwrap();
        }
        assert_eq!(session.stats().persistent_functions, 2);

        assert_eq!(session.invalidate_all(None), 3);
        assert_eq!(session.entry_count(transient.id()), 0);
        assert_eq!(session.entry_count(pinned.id()), 3);

        assert_eq!(session.invalidate_by_pkey("tables"), 3);
        assert_eq!(session.entry_count(keyed.id()), 0);
        assert_eq!(session.entry_count(pinned.id()), 3);

        assert_eq!(session.invalidate_all(Some(pinned.id())), 3);
        assert!(session.is_empty());
    }

    #[test]
    fn test_suspend_guard_nests() {
        let session = Session::default();
        {
            let _outer = session.suspend();
            {
                let _inner = session.suspend();
                assert_eq!(session.stats().suspended, 2);
            }
            assert!(session.is_suspended());
        }
        assert!(!session.is_suspended());
    }

    #[test]
    fn test_failure_caching_can_be_disabled() {
        let session = Session::with_config(SessionConfig::new().with_failure_caching(false), None);
        let f: Memoized<u32, u32> = cached("fails", |_, _| anyhow::bail!("nope"));

        assert!(f.call(&session, &1).is_err());
        assert!(session.is_empty());
    }

    #[test]
    fn test_putval_getval() {
        let session = Session::default();
        assert!(session.getval::<u32>("answer").unwrap_err().is_no_value());

        session.putval(42u32, "answer").unwrap();
        assert_eq!(*session.getval::<u32>("answer").unwrap(), 42);
        assert!(matches!(
            session.getval::<String>("answer"),
            Err(Error::TypeMismatch { .. })
        ));

        // getval values survive the broad sweep
        session.invalidate_all(None);
        assert_eq!(*session.getval::<u32>("answer").unwrap(), 42);
    }
}
