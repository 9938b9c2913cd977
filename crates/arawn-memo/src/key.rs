//! Canonical cache keys for call arguments.
//!
//! A key is built from the arguments of a call, never from the session
//! argument. Positional arguments keep their order; keyword arguments are
//! sorted by name, so `f(a=1, b=2)` and `f(b=2, a=1)` share one entry.
//!
//! Arguments are canonicalized through `serde`. When a whole argument bundle
//! is given to [`CacheKey::build`]:
//! - a tuple or sequence becomes the positional arguments,
//! - a struct or map becomes the keyword arguments,
//! - `()` or a unit struct means no arguments,
//! - anything else, `None` included, is a single positional argument.
//!
//! Non-finite floats keep distinct keys; `inf`, `-inf` and `NaN` never
//! collapse into `null`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::canonical;
use crate::error::{Error, Result};

/// Canonical, hashable identity of a call's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    encoded: String,
}

impl CacheKey {
    /// Build a key from an argument bundle.
    pub fn build<A: Serialize + ?Sized>(args: &A) -> Result<Self> {
        let builder = match canonical_value(args)? {
            Value::Array(items) => KeyBuilder {
                positional: items,
                ..KeyBuilder::new()
            },
            Value::Object(map) => KeyBuilder {
                keyword: map.into_iter().collect(),
                ..KeyBuilder::new()
            },
            other => KeyBuilder {
                positional: vec![other],
                ..KeyBuilder::new()
            },
        };
        builder.build()
    }

    /// Start building a key argument by argument.
    pub fn builder() -> KeyBuilder {
        KeyBuilder::new()
    }

    /// Key of a call without arguments.
    pub fn empty() -> Self {
        KeyBuilder::new().finish()
    }

    /// The canonical encoding.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Incremental builder for mixed positional and keyword arguments.
///
/// The first failure is kept and reported by [`KeyBuilder::build`].
#[derive(Debug, Default)]
pub struct KeyBuilder {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
    error: Option<Error>,
}

impl KeyBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        if self.error.is_none() {
            match canonical_value(value) {
                Ok(v) => self.positional.push(v),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    /// Add a keyword argument.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.keyword.contains_key(name) {
            self.error = Some(Error::Key {
                reason: format!("keyword argument {name} given twice"),
            });
            return self;
        }
        match canonical_value(value) {
            Ok(v) => {
                self.keyword.insert(name.to_string(), v);
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Finish the key, reporting the first argument that failed.
    pub fn build(self) -> Result<CacheKey> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.finish()),
        }
    }

    fn finish(self) -> CacheKey {
        let mut encoded = String::new();
        encoded.push('[');
        encode_seq(&self.positional, &mut encoded);
        encoded.push(',');
        encode_map(self.keyword.iter(), &mut encoded);
        encoded.push(']');
        CacheKey { encoded }
    }
}

fn canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    canonical::to_value(value).map_err(|e| Error::Key {
        reason: e.to_string(),
    })
}

// Object keys are sorted at every depth so map iteration order never leaks
// into the key.
fn encode(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => encode_seq(items, out),
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            encode_map(entries.into_iter(), out);
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn encode_seq(items: &[Value], out: &mut String) {
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        encode(item, out);
    }
    out.push(']');
}

fn encode_map<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>, out: &mut String) {
    out.push('{');
    for (i, (name, value)) in entries.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(name.clone()).to_string());
        out.push(':');
        encode(value, out);
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Window {
        start: u32,
        end: u32,
    }

    #[derive(Serialize)]
    struct WindowReversed {
        end: u32,
        start: u32,
    }

    struct Opaque;

    #[derive(Serialize)]
    struct NoArgs;

    impl Serialize for Opaque {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("opaque handle"))
        }
    }

    #[test]
    fn test_keyword_order_is_irrelevant() {
        let a = CacheKey::build(&Window { start: 1, end: 2 }).unwrap();
        let b = CacheKey::build(&WindowReversed { end: 2, start: 1 }).unwrap();
        assert_eq!(a, b);

        let c = CacheKey::builder().kwarg("x", &1).kwarg("y", &2).build().unwrap();
        let d = CacheKey::builder().kwarg("y", &2).kwarg("x", &1).build().unwrap();
        assert_eq!(c, d);
    }

    #[test]
    fn test_positional_order_matters() {
        let a = CacheKey::build(&(1, 2)).unwrap();
        let b = CacheKey::build(&(2, 1)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_positional_and_keyword_are_distinct() {
        let positional = CacheKey::builder().arg(&1).build().unwrap();
        let keyword = CacheKey::builder().kwarg("val", &1).build().unwrap();
        assert_ne!(positional, keyword);
    }

    #[test]
    fn test_bundle_forms() {
        assert_eq!(CacheKey::build(&()).unwrap(), CacheKey::empty());
        assert_eq!(
            CacheKey::build(&5u64).unwrap(),
            CacheKey::builder().arg(&5u64).build().unwrap()
        );
        assert_eq!(
            CacheKey::build(&(5u64,)).unwrap(),
            CacheKey::build(&5u64).unwrap()
        );
        assert_eq!(
            CacheKey::build(&Window { start: 3, end: 4 }).unwrap(),
            CacheKey::builder()
                .kwarg("start", &3)
                .kwarg("end", &4)
                .build()
                .unwrap()
        );
    }

    #[test]
    fn test_none_is_an_argument() {
        let none = CacheKey::build(&None::<Vec<u32>>).unwrap();
        let empty = CacheKey::build(&Some(Vec::<u32>::new())).unwrap();
        assert_ne!(none, empty);
        assert_ne!(none, CacheKey::build(&()).unwrap());
        assert_eq!(none, CacheKey::builder().arg(&None::<u8>).build().unwrap());
        assert_eq!(CacheKey::build(&NoArgs).unwrap(), CacheKey::empty());
    }

    #[test]
    fn test_non_finite_floats_are_distinct() {
        let keys: Vec<_> = [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, 0.0, 1.0]
            .iter()
            .map(|v| CacheKey::build(v).unwrap())
            .collect();
        for (i, a) in keys.iter().enumerate() {
            assert_ne!(a, &CacheKey::empty());
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(
            CacheKey::build(&f64::NAN).unwrap(),
            CacheKey::build(&(-f64::NAN)).unwrap()
        );
        assert_ne!(
            CacheKey::build(&(1.5f64, f64::INFINITY)).unwrap(),
            CacheKey::build(&(1.5f64, f64::NEG_INFINITY)).unwrap()
        );
    }

    #[test]
    fn test_nested_maps_are_canonical() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{i}"), i);
        }
        assert_eq!(
            CacheKey::build(&(first,)).unwrap(),
            CacheKey::build(&(second,)).unwrap()
        );
    }

    #[test]
    fn test_unhashable_argument_fails() {
        let mut by_pair = HashMap::new();
        by_pair.insert((1, 2), "a");
        let err = CacheKey::build(&(by_pair,)).unwrap_err();
        assert!(err.is_key());

        let err = CacheKey::builder().arg(&1).arg(&Opaque).build().unwrap_err();
        assert!(err.to_string().contains("opaque handle"));
    }

    #[test]
    fn test_duplicate_keyword_fails() {
        let err = CacheKey::builder()
            .kwarg("n", &1)
            .kwarg("n", &2)
            .build()
            .unwrap_err();
        assert!(err.is_key());
    }

    #[test]
    fn test_display_is_encoding() {
        let key = CacheKey::builder().arg(&"a").kwarg("b", &true).build().unwrap();
        assert_eq!(key.to_string(), r#"[["a"],{"b":true}]"#);
        assert_eq!(key.as_str(), key.to_string());
    }
}
