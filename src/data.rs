//! The opaque, string-keyed data bag shared by [`crate::dispatch_data::DispatchData`]
//! and [`crate::dispatch_result::DispatchResult`].
//!
//! Both the inbound envelope and the outbound result carry a "mapping string
//! -> value" whose enumeration is stable and whose missing keys return a null
//! sentinel rather than failing the lookup (spec §3). Sharing one type keeps
//! that behaviour consistent instead of reimplementing it twice.

use std::collections::BTreeMap;

use serde_json::Value;

/// An immutable-by-convention `string -> value` bag with stable enumeration
/// order and null-sentinel lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBag(BTreeMap<String, Value>);

impl DataBag {
    /// An empty bag.
    #[must_use]
    pub const fn new() -> Self { Self(BTreeMap::new()) }

    /// Fetch a value by key, returning `Value::Null` rather than `None` when
    /// the key is absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &Value { self.0.get(key).unwrap_or(&Value::Null) }

    /// Whether `key` has an explicit entry (distinct from an entry whose
    /// value happens to be `Value::Null`).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool { self.0.contains_key(key) }

    /// Set `key` to `value`, overwriting any previous entry.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) { self.0.insert(key.into(), value); }

    /// Iterate entries in stable (lexicographic) key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> { self.0.iter().map(|(k, v)| (k.as_str(), v)) }

    /// Number of explicit entries.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the bag has no explicit entries.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Merge `overrides` on top of this bag: every key present in `overrides`
    /// replaces this bag's value, and a `Value::Null` override removes the
    /// key entirely rather than setting it to null. Used to compute an
    /// aggregate result's merge-view (spec §3).
    #[must_use]
    pub fn merged_with_overrides(&self, overrides: &Self) -> Self {
        let mut out = self.0.clone();
        for (key, value) in &overrides.0 {
            if value.is_null() {
                out.remove(key);
            } else {
                out.insert(key.clone(), value.clone());
            }
        }
        Self(out)
    }

    /// Build a bag whose values are the first one present for each key,
    /// scanning `sources` in order. Used to compute an aggregate's
    /// child-order-precedence base view before overrides are applied.
    #[must_use]
    pub fn first_wins<'a>(sources: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut out = BTreeMap::new();
        for source in sources {
            for (key, value) in &source.0 {
                out.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        Self(out)
    }
}

impl FromIterator<(String, Value)> for DataBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self { Self(iter.into_iter().collect()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_returns_null_sentinel() {
        let bag = DataBag::new();
        assert_eq!(bag.get("absent"), &Value::Null);
        assert!(!bag.contains_key("absent"));
    }

    #[test]
    fn override_replaces_and_null_removes() {
        let mut base = DataBag::new();
        base.insert("a", Value::from(1));
        base.insert("b", Value::from(2));
        let mut overrides = DataBag::new();
        overrides.insert("a", Value::from(99));
        overrides.insert("b", Value::Null);

        let merged = base.merged_with_overrides(&overrides);
        assert_eq!(merged.get("a"), &Value::from(99));
        assert_eq!(merged.get("b"), &Value::Null);
        assert!(!merged.contains_key("b"));
    }

    #[test]
    fn first_wins_takes_earliest_source_per_key() {
        let mut first = DataBag::new();
        first.insert("k", Value::from("first"));
        let mut second = DataBag::new();
        second.insert("k", Value::from("second"));
        second.insert("only-second", Value::from(1));

        let combined = DataBag::first_wins([&first, &second]);
        assert_eq!(combined.get("k"), &Value::from("first"));
        assert_eq!(combined.get("only-second"), &Value::from(1));
    }
}
