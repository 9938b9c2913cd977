//! Property tests for memoization invariants.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arawn_memo::{CacheKey, Memoized, Session, cached};
use proptest::prelude::*;

fn tagged(runs: Arc<AtomicUsize>) -> Memoized<(i64, String), String> {
    cached("tagged", move |_, (n, tag): &(i64, String)| {
        runs.fetch_add(1, Ordering::SeqCst);
        if *n < 0 {
            anyhow::bail!("negative: {n}");
        }
        Ok(format!("{tag}:{n}"))
    })
}

fn float_arg() -> impl Strategy<Value = f64> {
    prop_oneof![
        any::<f64>(),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
        Just(f64::NAN),
        Just(0.0),
    ]
}

fn same_float(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
}

proptest! {
    /// Property: a second call with the same arguments never runs the body
    /// again and replays the same outcome.
    #[test]
    fn repeated_calls_run_body_once(n in -1000i64..1000, tag in "[a-z]{0,8}") {
        let runs = Arc::new(AtomicUsize::new(0));
        let f = tagged(Arc::clone(&runs));
        let session = Session::default();
        let args = (n, tag);

        let first = f.call(&session, &args).map_err(|e| e.to_string());
        let second = f.call(&session, &args).map_err(|e| e.to_string());

        prop_assert_eq!(runs.load(Ordering::SeqCst), 1);
        prop_assert_eq!(first, second);
    }

    /// Property: keyword arguments produce the same key in any insertion order.
    #[test]
    fn keyword_order_never_changes_key(
        kwargs in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..8)
    ) {
        let forward = kwargs
            .iter()
            .fold(CacheKey::builder(), |b, (name, v)| b.kwarg(name, v))
            .build()
            .unwrap();
        let backward = kwargs
            .iter()
            .rev()
            .fold(CacheKey::builder(), |b, (name, v)| b.kwarg(name, v))
            .build()
            .unwrap();
        let bundled = CacheKey::build(&kwargs).unwrap();

        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(&forward, &bundled);
    }

    /// Property: distinct optional lists never share a key.
    #[test]
    fn distinct_option_lists_get_distinct_keys(
        a in prop::option::of(prop::collection::vec(any::<i32>(), 0..4)),
        b in prop::option::of(prop::collection::vec(any::<i32>(), 0..4)),
    ) {
        let key_a = CacheKey::build(&a).unwrap();
        let key_b = CacheKey::build(&b).unwrap();
        prop_assert_eq!(a == b, key_a == key_b);
    }

    /// Property: floats share a key only when they are the same value, with
    /// every NaN treated as one value.
    #[test]
    fn distinct_floats_get_distinct_keys(a in float_arg(), b in float_arg()) {
        let key_a = CacheKey::build(&a).unwrap();
        let key_b = CacheKey::build(&b).unwrap();
        prop_assert_eq!(same_float(a, b), key_a == key_b);

        let pair_a = CacheKey::build(&(a, Some(b))).unwrap();
        let pair_b = CacheKey::build(&(a, None::<f64>)).unwrap();
        prop_assert_ne!(pair_a, pair_b);
    }

    /// Property: a child never changes what its parent holds.
    #[test]
    fn child_writes_stay_local(values in prop::collection::vec(0u32..50, 1..20)) {
        let f: Memoized<u32, u64> = cached("square", |_, n| Ok(u64::from(*n) * u64::from(*n)));
        let parent = Session::default();
        f.call(&parent, &0).unwrap();

        let child = parent.child();
        for v in &values {
            prop_assert_eq!(*f.call(&child, v).unwrap(), u64::from(*v) * u64::from(*v));
        }
        prop_assert_eq!(parent.len(), 1);
    }
}
