//! Equality-only tag index.

use crate::index::traits::{splice_out, TagIndex};
use crate::key::PrimaryKey;
use std::collections::HashMap;
use std::hash::Hash;

/// Hash-based tag index for equality lookups.
///
/// Backs the bool, float and string tag types:
/// `name -> value -> [key, ...]` with keys in insertion order.
#[derive(Debug)]
pub struct HashTagIndex<V> {
    buckets: HashMap<String, HashMap<V, Vec<PrimaryKey>>>,
    count: usize,
}

impl<V> Default for HashTagIndex<V> {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            count: 0,
        }
    }
}

impl<V: Eq + Hash + Clone> HashTagIndex<V> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<V: Eq + Hash + Clone + Send + Sync> TagIndex for HashTagIndex<V> {
    type Value = V;

    fn add(&mut self, name: &str, value: V, key: &PrimaryKey) {
        self.buckets
            .entry(name.to_owned())
            .or_default()
            .entry(value)
            .or_default()
            .push(key.clone());
        self.count += 1;
    }

    fn remove_entry_by_tag(&mut self, name: &str, value: &V, key: &PrimaryKey) -> bool {
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

    fn lookup(&self, name: &str, value: &V) -> &[PrimaryKey] {
        self.buckets
            .get(name)
            .and_then(|values| values.get(value))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn bindings(&self) -> Vec<(String, V, PrimaryKey)> {
        let mut out = Vec::with_capacity(self.count);
        for (name, values) in &self.buckets {
            for (value, keys) in values {
                for key in keys {
                    out.push((name.clone(), value.clone(), key.clone()));
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
