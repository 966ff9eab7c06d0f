//! The four per-type tag indices, maintained as one unit.

use crate::entity::{FloatKey, TagSet, TagValue};
use crate::error::{CoreError, CoreResult};
use crate::index::btree::OrderedTagIndex;
use crate::index::hash::HashTagIndex;
use crate::index::traits::TagIndex;
use crate::key::PrimaryKey;
use crate::query::{TagCondition, TagFilter};
use std::collections::HashSet;

/// Bool, int, float and string tag indices.
///
/// Bindings are only ever added or removed for a whole [`TagSet`] at a
/// time, through [`set_entry_tags`](Self::set_entry_tags) and
/// [`clear_entry_tags`](Self::clear_entry_tags).
#[derive(Debug, Default)]
pub struct TagIndexes {
    bools: HashTagIndex<bool>,
    ints: OrderedTagIndex,
    floats: HashTagIndex<FloatKey>,
    strings: HashTagIndex<String>,
}

impl TagIndexes {
    /// Creates an empty index family.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every tag of `tags` for `key`.
    pub fn set_entry_tags(&mut self, key: &PrimaryKey, tags: &TagSet) {
        for (name, value) in tags {
            match value {
                TagValue::Bool(v) => self.bools.add(name, *v, key),
                TagValue::Int(v) => self.ints.add(name, *v, key),
                TagValue::Float(v) => self.floats.add(name, FloatKey::new(*v), key),
                TagValue::Str(v) => self.strings.add(name, v.clone(), key),
            }
        }
    }

    /// Unregisters every tag of `tags` for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolated`] if a binding is missing; the
    /// indices no longer mirror the entries at that point.
    pub fn clear_entry_tags(&mut self, key: &PrimaryKey, tags: &TagSet) -> CoreResult<()> {
        for (name, value) in tags {
            let removed = match value {
                TagValue::Bool(v) => self.bools.remove_entry_by_tag(name, v, key),
                TagValue::Int(v) => self.ints.remove_entry_by_tag(name, v, key),
                TagValue::Float(v) => {
                    self.floats
                        .remove_entry_by_tag(name, &FloatKey::new(*v), key)
                }
                TagValue::Str(v) => self.strings.remove_entry_by_tag(name, v, key),
            };
            if !removed {
                return Err(CoreError::invariant(format!(
                    "tag {name}={value} of {key} missing from its index"
                )));
            }
        }
        Ok(())
    }

    /// Keys that satisfy at least one of `filters`, de-duplicated.
    ///
    /// This is a narrowing hint only; callers re-check every filter against
    /// the entry's live tag set.
    #[must_use]
    pub fn candidates(&self, filters: &[TagFilter]) -> Vec<PrimaryKey> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for filter in filters {
            for key in self.lookup(filter) {
                if seen.insert(key.clone()) {
                    out.push(key);
                }
            }
        }
        out
    }

    /// Returns true if no entry can satisfy `filter`. Integer ranges are
    /// judged against the stored span of values for the name.
    #[must_use]
    pub fn rules_out(&self, filter: &TagFilter) -> bool {
        match filter.condition() {
            TagCondition::IntRange { lower, upper } => {
                !self.ints.overlaps(filter.name(), &(*lower, *upper))
            }
            TagCondition::Equals(_) => false,
        }
    }

    fn lookup(&self, filter: &TagFilter) -> Vec<PrimaryKey> {
        let name = filter.name();
        match filter.condition() {
            TagCondition::Equals(TagValue::Bool(v)) => self.bools.lookup(name, v).to_vec(),
            TagCondition::Equals(TagValue::Int(v)) => self.ints.lookup(name, v).to_vec(),
            TagCondition::Equals(TagValue::Float(v)) => {
                self.floats.lookup(name, &FloatKey::new(*v)).to_vec()
            }
            TagCondition::Equals(TagValue::Str(v)) => self.strings.lookup(name, v).to_vec(),
            TagCondition::IntRange { lower, upper } => self.ints.range(name, (*lower, *upper)),
        }
    }

    /// Every `(name, value, key)` binding across the four indices.
    #[must_use]
    pub fn bindings(&self) -> Vec<(String, TagValue, PrimaryKey)> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(
            self.bools
                .bindings()
                .into_iter()
                .map(|(n, v, k)| (n, TagValue::Bool(v), k)),
        );
        out.extend(
            self.ints
                .bindings()
                .into_iter()
                .map(|(n, v, k)| (n, TagValue::Int(v), k)),
        );
        out.extend(
            self.floats
                .bindings()
                .into_iter()
                .map(|(n, v, k)| (n, TagValue::Float(v.value()), k)),
        );
        out.extend(
            self.strings
                .bindings()
                .into_iter()
                .map(|(n, v, k)| (n, TagValue::Str(v), k)),
        );
        out
    }

    /// Number of bindings referring to `key`.
    #[must_use]
    pub fn references(&self, key: &PrimaryKey) -> usize {
        self.bindings().iter().filter(|(_, _, k)| k == key).count()
    }

    /// Total number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bools.len() + self.ints.len() + self.floats.len() + self.strings.len()
    }

    /// Returns true if no tags are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every binding.
    pub fn clear(&mut self) {
        self.bools.clear();
        self.ints.clear();
        self.floats.clear();
        self.strings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Tag;

    fn tags(list: Vec<Tag>) -> TagSet {
        TagSet::from_tags(list).unwrap()
    }

    #[test]
    fn set_and_clear_are_symmetric() {
        let mut index = TagIndexes::new();
        let key = PrimaryKey::from("user:1");
        let set = tags(vec![
            Tag::bool("a", true),
            Tag::string("b", "x"),
            Tag::int("n", 5),
            Tag::float("f", -0.0),
        ]);

        index.set_entry_tags(&key, &set);
        assert_eq!(index.len(), 4);
        assert_eq!(index.references(&key), 4);

        index.clear_entry_tags(&key, &set).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.references(&key), 0);
    }

    #[test]
    fn clearing_unknown_binding_is_invariant_violation() {
        let mut index = TagIndexes::new();
        let err = index
            .clear_entry_tags(&"k".into(), &tags(vec![Tag::bool("a", true)]))
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn candidates_union_and_dedup() {
        let mut index = TagIndexes::new();
        index.set_entry_tags(&"a".into(), &tags(vec![Tag::bool("x", true), Tag::int("n", 1)]));
        index.set_entry_tags(&"b".into(), &tags(vec![Tag::bool("x", true)]));
        index.set_entry_tags(&"c".into(), &tags(vec![Tag::int("n", 1)]));

        let found = index.candidates(&[TagFilter::eq("x", true), TagFilter::eq("n", 1_i64)]);
        assert_eq!(
            found,
            vec![PrimaryKey::from("a"), PrimaryKey::from("b"), PrimaryKey::from("c")]
        );
    }

    #[test]
    fn float_lookup_uses_canonical_zero() {
        let mut index = TagIndexes::new();
        index.set_entry_tags(&"a".into(), &tags(vec![Tag::float("f", -0.0)]));
        assert_eq!(
            index.candidates(&[TagFilter::eq("f", 0.0)]),
            vec![PrimaryKey::from("a")]
        );
    }

    #[test]
    fn int_range_candidates() {
        let mut index = TagIndexes::new();
        for (key, age) in [("a", 10_i64), ("b", 20), ("c", 30)] {
            index.set_entry_tags(&key.into(), &tags(vec![Tag::int("age", age)]));
        }
        assert_eq!(
            index.candidates(&[TagFilter::int_ge("age", 20)]),
            vec![PrimaryKey::from("b"), PrimaryKey::from("c")]
        );
        assert_eq!(
            index.candidates(&[TagFilter::int_between("age", 15, 25)]),
            vec![PrimaryKey::from("b")]
        );
    }

    #[test]
    fn ranges_outside_the_span_are_ruled_out() {
        let mut index = TagIndexes::new();
        for (key, age) in [("a", 10_i64), ("b", 20)] {
            index.set_entry_tags(&key.into(), &tags(vec![Tag::int("age", age)]));
        }
        assert!(index.rules_out(&TagFilter::int_gt("age", 20)));
        assert!(index.rules_out(&TagFilter::int_lt("age", 10)));
        assert!(index.rules_out(&TagFilter::int_ge("weight", 0)));
        assert!(!index.rules_out(&TagFilter::int_between("age", 12, 15)));
        assert!(!index.rules_out(&TagFilter::int_le("age", 10)));
        assert!(!index.rules_out(&TagFilter::eq("age", 99_i64)));
    }
}
