//! Explicit session memoization.
//!
//! Memoized functions take a session as their first argument and cache
//! their results in it. Caching is controlled by what you pass as that
//! session, never by the functions themselves:
//! - a [`Session`] caches, optionally falling back to a parent session
//! - [`Session::invalidating`] drops the entry of a call
//! - [`Session::forcing`] injects a result for a call
//! - [`Session::call_only`] runs a call without caching it
//! - [`Session::with_cache_suspended`] disables caching for a whole call tree
//!
//! Successes and failures are both cached and replayed.
//!
//! # Example
//!
//! ```rust,ignore
//! use arawn_memo::{Memoized, Session, cached};
//!
//! let area: Memoized<(u32, u32), u32> = cached("area", |_, (w, h)| Ok(w * h));
//!
//! let session = Session::default();
//! assert_eq!(*area.call(&session, &(3, 4))?, 12);
//!
//! // later calls replay the stored result
//! assert_eq!(*area.call(&session, &(3, 4))?, 12);
//!
//! // inject a result without running the body
//! area.call(&session.forcing(99u32), &(5, 5))?;
//! assert_eq!(*area.call(&session, &(5, 5))?, 99);
//! ```

mod canonical;
mod config;
mod error;
mod hooks;
mod key;
mod memoize;
mod session;
pub mod views;

pub use config::{DEFAULT_SESSION_NAME, SessionConfig};
pub use error::{Error, Result};
pub use hooks::{CacheStore, CachedValue, FunctionId, Lookup, Outcome, Persistence, SessionHooks};
pub use key::{CacheKey, KeyBuilder};
pub use memoize::{Memoized, cached, gcached, rcached};
pub use session::{Session, SessionStats, SuspendGuard};
pub use views::{
    CallOnly, ForceSet, Invalidating, call_only_view, force_failure_view, force_set_view,
    invalidate_view, with_cache_suspended,
};
