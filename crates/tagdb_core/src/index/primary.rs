//! Ordered primary key index.

use crate::entity::Entry;
use crate::error::{CoreError, CoreResult};
use crate::key::{KeyPattern, PrimaryKey};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Ordered map of entries by [`PrimaryKey`].
///
/// Traversals take a receiver returning `Ok(true)` to continue or
/// `Ok(false)` to stop early; an `Err` aborts the traversal.
///
/// # Example
///
/// ```rust,ignore
/// index.ascend_range(&"user:1".into(), &"user:9".into(), |entry| {
///     println!("{}", entry.key());
///     Ok(true)
/// })?;
/// ```
#[derive(Debug, Default)]
pub struct PrimaryKeyIndex {
    entries: BTreeMap<PrimaryKey, Entry>,
}

impl PrimaryKeyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyAlreadyExists`] if the key is present.
    pub fn insert(&mut self, entry: Entry) -> CoreResult<()> {
        if self.entries.contains_key(&entry.key) {
            return Err(CoreError::key_already_exists(entry.key.as_str()));
        }
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Upserts an entry, returning the entry it replaced.
    ///
    /// The index does not know about tag bindings: callers replacing an
    /// entry must clear the returned entry's tags from the tag indices.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyAlreadyExists`] without touching the index
    /// when the key is present and `replace` is false.
    pub fn put(&mut self, entry: Entry, replace: bool) -> CoreResult<Option<Entry>> {
        if !replace && self.entries.contains_key(&entry.key) {
            return Err(CoreError::key_already_exists(entry.key.as_str()));
        }
        Ok(self.entries.insert(entry.key.clone(), entry))
    }

    /// Looks up an entry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent.
    pub fn find_by_key(&self, key: &PrimaryKey) -> CoreResult<&Entry> {
        self.entries
            .get(key)
            .ok_or_else(|| CoreError::document_not_found(key.as_str()))
    }

    /// Looks up an entry without failing.
    #[must_use]
    pub fn get(&self, key: &PrimaryKey) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &PrimaryKey) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains(&self, key: &PrimaryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Visits the entries for `keys` in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] for a key that is absent, or
    /// the receiver's error.
    pub fn find_by_keys<F>(&self, keys: &[PrimaryKey], mut receiver: F) -> CoreResult<()>
    where
        F: FnMut(&Entry) -> CoreResult<bool>,
    {
        for key in keys {
            if !receiver(self.find_by_key(key)?)? {
                break;
            }
        }
        Ok(())
    }

    /// Removes an entry, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent.
    pub fn remove(&mut self, key: &PrimaryKey) -> CoreResult<Entry> {
        self.entries
            .remove(key)
            .ok_or_else(|| CoreError::document_not_found(key.as_str()))
    }

    /// Visits every entry in ascending key order.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error.
    pub fn ascend<F>(&self, receiver: F) -> CoreResult<()>
    where
        F: FnMut(&Entry) -> CoreResult<bool>,
    {
        visit(self.entries.values(), receiver)
    }

    /// Visits every entry in descending key order.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error.
    pub fn descend<F>(&self, receiver: F) -> CoreResult<()>
    where
        F: FnMut(&Entry) -> CoreResult<bool>,
    {
        visit(self.entries.values().rev(), receiver)
    }

    /// Visits entries with `from <= key < to` in ascending order.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error.
    pub fn ascend_range<F>(&self, from: &PrimaryKey, to: &PrimaryKey, receiver: F) -> CoreResult<()>
    where
        F: FnMut(&Entry) -> CoreResult<bool>,
    {
        if from > to {
            return Ok(());
        }
        let range = self
            .entries
            .range((Bound::Included(from), Bound::Excluded(to)));
        visit(range.map(|(_, e)| e), receiver)
    }

    /// Visits entries with `to < key <= from` in descending order.
    ///
    /// The bounds swap roles relative to [`Self::ascend_range`]: `from` is
    /// the greater, inclusive side because iteration starts there.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error.
    pub fn descend_range<F>(&self, from: &PrimaryKey, to: &PrimaryKey, receiver: F) -> CoreResult<()>
    where
        F: FnMut(&Entry) -> CoreResult<bool>,
    {
        if to > from {
            return Ok(());
        }
        let range = self
            .entries
            .range((Bound::Excluded(to), Bound::Included(from)));
        visit(range.rev().map(|(_, e)| e), receiver)
    }

    /// Visits entries matching `pattern` in ascending order.
    ///
    /// Iteration starts at the pattern's literal prefix and stops at the
    /// first key outside that prefix.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error.
    pub fn ascend_prefix<F>(&self, pattern: &KeyPattern, receiver: F) -> CoreResult<()>
    where
        F: FnMut(&Entry) -> CoreResult<bool>,
    {
        match pattern.literal_prefix() {
            None => visit(
                self.entries.values().filter(|e| pattern.matches(&e.key)),
                receiver,
            ),
            Some(pivot) => visit(
                self.prefix_run(&pivot)
                    .map(|(_, e)| e)
                    .filter(|e| pattern.matches(&e.key)),
                receiver,
            ),
        }
    }

    /// Visits entries matching `pattern` in descending order.
    ///
    /// # Errors
    ///
    /// Propagates the receiver's error.
    pub fn descend_prefix<F>(&self, pattern: &KeyPattern, receiver: F) -> CoreResult<()>
    where
        F: FnMut(&Entry) -> CoreResult<bool>,
    {
        let Some(pivot) = pattern.literal_prefix() else {
            return visit(
                self.entries
                    .values()
                    .rev()
                    .filter(|e| pattern.matches(&e.key)),
                receiver,
            );
        };

        // Find where the run ends, then walk it backwards.
        let Some((last, _)) = self.prefix_run(&pivot).last() else {
            return Ok(());
        };
        let range = self
            .entries
            .range((Bound::Included(&pivot), Bound::Included(last)));
        visit(
            range
                .rev()
                .map(|(_, e)| e)
                .filter(|e| pattern.matches(&e.key)),
            receiver,
        )
    }

    fn prefix_run<'a>(
        &'a self,
        pivot: &'a PrimaryKey,
    ) -> impl Iterator<Item = (&'a PrimaryKey, &'a Entry)> + 'a {
        self.entries
            .range((Bound::Included(pivot), Bound::Unbounded))
            .take_while(move |(k, _)| k.has_segment_prefix(pivot))
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Entry> + '_ {
        self.entries.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> + '_ {
        self.entries.values_mut()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn visit<'a, I, F>(entries: I, mut receiver: F) -> CoreResult<()>
where
    I: Iterator<Item = &'a Entry>,
    F: FnMut(&Entry) -> CoreResult<bool>,
{
    for entry in entries {
        if !receiver(entry)? {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::TagSet;

    fn entry(key: &str) -> Entry {
        Entry::new(key.into(), key.as_bytes().to_vec(), TagSet::new())
    }

    fn index_of(keys: &[&str]) -> PrimaryKeyIndex {
        let mut index = PrimaryKeyIndex::new();
        for key in keys {
            index.insert(entry(key)).unwrap();
        }
        index
    }

    fn collect<F>(traverse: F) -> Vec<String>
    where
        F: FnOnce(&mut dyn FnMut(&Entry) -> CoreResult<bool>) -> CoreResult<()>,
    {
        let mut keys = Vec::new();
        traverse(&mut |e: &Entry| {
            keys.push(e.key().to_string());
            Ok(true)
        })
        .unwrap();
        keys
    }

    #[test]
    fn insert_duplicate_fails_without_change() {
        let mut index = index_of(&["a"]);
        let mut dup = entry("a");
        dup.value = Some(b"other".to_vec());

        assert!(matches!(
            index.insert(dup),
            Err(CoreError::KeyAlreadyExists { .. })
        ));
        assert_eq!(index.count(), 1);
        assert_eq!(
            index.find_by_key(&"a".into()).unwrap().resident_value(),
            Some(&b"a"[..])
        );
    }

    #[test]
    fn put_with_and_without_replace() {
        let mut index = index_of(&["a"]);

        assert!(index.put(entry("a"), false).is_err());
        let old = index.put(entry("a"), true).unwrap();
        assert!(old.is_some());
        assert!(index.put(entry("b"), false).unwrap().is_none());
        assert_eq!(index.count(), 2);
    }

    #[test]
    fn find_and_remove_missing() {
        let mut index = index_of(&["a"]);
        assert!(matches!(
            index.find_by_key(&"zz".into()),
            Err(CoreError::DocumentNotFound { .. })
        ));
        assert!(matches!(
            index.remove(&"zz".into()),
            Err(CoreError::DocumentNotFound { .. })
        ));
        assert_eq!(index.remove(&"a".into()).unwrap().key().as_str(), "a");
        assert!(index.is_empty());
    }

    #[test]
    fn ascend_uses_numeric_segments() {
        let index = index_of(&["user:10", "user:2", "user:1"]);
        assert_eq!(
            collect(|r| index.ascend(r)),
            ["user:1", "user:2", "user:10"]
        );
        assert_eq!(
            collect(|r| index.descend(r)),
            ["user:10", "user:2", "user:1"]
        );
    }

    #[test]
    fn ascend_range_is_half_open() {
        let index = index_of(&["k:1", "k:2", "k:3", "k:4"]);
        assert_eq!(
            collect(|r| index.ascend_range(&"k:2".into(), &"k:4".into(), r)),
            ["k:2", "k:3"]
        );
        assert!(collect(|r| index.ascend_range(&"k:4".into(), &"k:2".into(), r)).is_empty());
    }

    #[test]
    fn descend_range_swaps_bound_roles() {
        let index = index_of(&["k:1", "k:2", "k:3", "k:4"]);
        // `from` is the upper, inclusive bound when descending.
        assert_eq!(
            collect(|r| index.descend_range(&"k:3".into(), &"k:1".into(), r)),
            ["k:3", "k:2"]
        );
        // Ascending-style bounds select nothing.
        assert!(collect(|r| index.descend_range(&"k:1".into(), &"k:3".into(), r)).is_empty());
    }

    #[test]
    fn prefix_traversal() {
        let index = index_of(&["product:5", "user", "user:5", "user:5:pet:1", "user:6", "users"]);
        let pattern = KeyPattern::new("user:5");
        assert_eq!(
            collect(|r| index.ascend_prefix(&pattern, r)),
            ["user:5", "user:5:pet:1"]
        );
        assert_eq!(
            collect(|r| index.descend_prefix(&pattern, r)),
            ["user:5:pet:1", "user:5"]
        );

        let pattern = KeyPattern::new("user:*");
        assert_eq!(
            collect(|r| index.ascend_prefix(&pattern, r)),
            ["user", "user:5", "user:5:pet:1", "user:6"]
        );
    }

    #[test]
    fn prefix_with_inner_wildcard_and_leading_wildcard() {
        let index = index_of(&["user:1:pet", "user:1:car", "user:2:pet:9", "zoo:1:pet"]);
        assert_eq!(
            collect(|r| index.ascend_prefix(&KeyPattern::new("user:*:pet"), r)),
            ["user:1:pet", "user:2:pet:9"]
        );
        assert_eq!(
            collect(|r| index.descend_prefix(&KeyPattern::new("*:*:pet"), r)),
            ["zoo:1:pet", "user:2:pet:9", "user:1:pet"]
        );
        assert!(collect(|r| index.descend_prefix(&KeyPattern::new("nope"), r)).is_empty());
    }

    #[test]
    fn receiver_can_stop_early() {
        let index = index_of(&["a", "b", "c"]);
        let mut seen = 0;
        index
            .ascend(|_| {
                seen += 1;
                Ok(seen < 2)
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn find_by_keys_keeps_caller_order() {
        let index = index_of(&["a", "b", "c"]);
        let keys: Vec<PrimaryKey> = ["c", "a", "b"].iter().map(|k| (*k).into()).collect();
        assert_eq!(collect(|r| index.find_by_keys(&keys, r)), ["c", "a", "b"]);

        let missing = vec![PrimaryKey::from("x")];
        assert!(index.find_by_keys(&missing, |_| Ok(true)).is_err());
    }
}
