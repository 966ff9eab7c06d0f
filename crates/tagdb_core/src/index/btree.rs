//! Ordered integer tag index.

use crate::index::traits::{splice_out, TagIndex};
use crate::key::PrimaryKey;
use std::collections::{BTreeMap, HashMap};
use std::ops::{Bound, RangeBounds};

/// BTree-backed tag index for integer tags.
///
/// Each tag name owns a value-ordered map of buckets, which serves range
/// predicates (`<`, `<=`, `>`, `>=`, between) in addition to equality.
///
/// # Example
///
/// ```rust,ignore
/// let mut index = OrderedTagIndex::new();
/// index.add("age", 25, &"user:1".into());
///
/// let adults = index.range("age", 18..);
/// ```
#[derive(Debug, Default)]
pub struct OrderedTagIndex {
    buckets: HashMap<String, BTreeMap<i64, Vec<PrimaryKey>>>,
    count: usize,
}

impl OrderedTagIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns keys whose `name` tag falls in `range`, ordered by tag value.
    pub fn range<R>(&self, name: &str, range: R) -> Vec<PrimaryKey>
    where
        R: RangeBounds<i64>,
    {
        if range_is_empty(&range) {
            return Vec::new();
        }
        let Some(values) = self.buckets.get(name) else {
            return Vec::new();
        };
        values
            .range(range)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    /// Returns the smallest value bound to `name`.
    #[must_use]
    pub fn min_value(&self, name: &str) -> Option<i64> {
        self.buckets.get(name)?.keys().next().copied()
    }

    /// Returns the largest value bound to `name`.
    #[must_use]
    pub fn max_value(&self, name: &str) -> Option<i64> {
        self.buckets.get(name)?.keys().next_back().copied()
    }

    /// Returns true if `range` intersects the span between the smallest and
    /// largest values bound to `name`.
    pub fn overlaps<R>(&self, name: &str, range: &R) -> bool
    where
        R: RangeBounds<i64>,
    {
        let (Some(min), Some(max)) = (self.min_value(name), self.max_value(name)) else {
            return false;
        };
        let starts_in = match range.start_bound() {
            Bound::Included(v) => *v <= max,
            Bound::Excluded(v) => *v < max,
            Bound::Unbounded => true,
        };
        let ends_in = match range.end_bound() {
            Bound::Included(v) => *v >= min,
            Bound::Excluded(v) => *v > min,
            Bound::Unbounded => true,
        };
        starts_in && ends_in && !range_is_empty(range)
    }
}

/// `BTreeMap::range` panics on inverted bounds; detect them up front.
fn range_is_empty<R: RangeBounds<i64>>(range: &R) -> bool {
    let start = match range.start_bound() {
        Bound::Included(v) => Some((*v, true)),
        Bound::Excluded(v) => Some((*v, false)),
        Bound::Unbounded => None,
    };
    let end = match range.end_bound() {
        Bound::Included(v) => Some((*v, true)),
        Bound::Excluded(v) => Some((*v, false)),
        Bound::Unbounded => None,
    };
    match (start, end) {
        (Some((s, s_inc)), Some((e, e_inc))) => s > e || (s == e && !(s_inc && e_inc)),
        _ => false,
    }
}

impl TagIndex for OrderedTagIndex {
    type Value = i64;

    fn add(&mut self, name: &str, value: i64, key: &PrimaryKey) {
        self.buckets
            .entry(name.to_owned())
            .or_default()
            .entry(value)
            .or_default()
            .push(key.clone());
        self.count += 1;
    }

    fn remove_entry_by_tag(&mut self, name: &str, value: &i64, key: &PrimaryKey) -> bool {
        let Some(values) = self.buckets.get_mut(name) else {
            return false;
        };
        let Some(bucket) = values.get_mut(value) else {
            return false;
        };
        if !splice_out(bucket, key) {
            return false;
        }
        self.count -= 1;
        if bucket.is_empty() {
            values.remove(value);
            if values.is_empty() {
                self.buckets.remove(name);
            }
        }
        true
    }

    fn lookup(&self, name: &str, value: &i64) -> &[PrimaryKey] {
        self.buckets
            .get(name)
            .and_then(|values| values.get(value))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn bindings(&self) -> Vec<(String, i64, PrimaryKey)> {
        let mut out = Vec::with_capacity(self.count);
        for (name, values) in &self.buckets {
            for (value, keys) in values {
                for key in keys {
                    out.push((name.clone(), *value, key.clone()));
                }
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.count
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.count = 0;
    }
}
