//! In-memory state: the primary index, the tag indices and value access.
//!
//! Every mutation goes through [`Engine`] so that the tag indices always
//! mirror the union of the entries' tag sets: an entry's old bindings are
//! cleared before its new ones are added, never one without the other.

use crate::cache::ValueCache;
use crate::config::LoadStrategy;
use crate::entity::{Document, Entry, Tag, TagSet};
use crate::error::{CoreError, CoreResult};
use crate::index::{PrimaryKeyIndex, TagIndexes};
use crate::key::PrimaryKey;
use crate::wal::{Command, CommandLog, EncodedRecord, LogRecord};
use std::sync::Arc;
use tracing::warn;

/// Engine state guarded by the transaction manager's lock.
#[derive(Debug)]
pub struct Engine {
    primary: PrimaryKeyIndex,
    tags: TagIndexes,
    log: Option<Arc<CommandLog>>,
    cache: Option<Arc<ValueCache>>,
    load: LoadStrategy,
}

impl Engine {
    /// Creates an empty engine.
    ///
    /// Without a log values are always resident. The cache is only consulted
    /// under [`LoadStrategy::Buffered`].
    pub fn new(
        log: Option<Arc<CommandLog>>,
        cache: Option<Arc<ValueCache>>,
        load: LoadStrategy,
    ) -> Self {
        let load = if log.is_some() {
            load
        } else {
            LoadStrategy::Eager
        };
        Self {
            primary: PrimaryKeyIndex::new(),
            tags: TagIndexes::new(),
            log,
            cache: cache.filter(|_| load == LoadStrategy::Buffered),
            load,
        }
    }

    /// Returns the primary index.
    #[must_use]
    pub fn primary(&self) -> &PrimaryKeyIndex {
        &self.primary
    }

    /// Returns the tag indices.
    #[must_use]
    pub fn tags(&self) -> &TagIndexes {
        &self.tags
    }

    /// Returns the command log, if persistent.
    #[must_use]
    pub fn log(&self) -> Option<&Arc<CommandLog>> {
        self.log.as_ref()
    }

    /// Returns the value cache, if buffered.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<ValueCache>> {
        self.cache.as_ref()
    }

    /// Returns the effective load strategy.
    #[must_use]
    pub fn load_strategy(&self) -> LoadStrategy {
        self.load
    }

    /// Inserts or replaces an entry, rebinding its tags.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyAlreadyExists`] without side effects when the
    /// key exists and `replace` is false.
    pub fn put_entry(&mut self, entry: Entry, replace: bool) -> CoreResult<Option<Entry>> {
        if let Some(old) = self.primary.get(&entry.key) {
            if !replace {
                return Err(CoreError::key_already_exists(entry.key.as_str()));
            }
            if let Some(tags) = &old.tags {
                self.tags.clear_entry_tags(&old.key, tags)?;
            }
        }
        if let Some(tags) = &entry.tags {
            self.tags.set_entry_tags(&entry.key, tags);
        }
        let previous = self.primary.put(entry, true)?;
        if let Some(old) = &previous {
            self.forget_cached(old);
        }
        Ok(previous)
    }

    /// Removes an entry and its tag bindings.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent.
    pub fn remove_entry(&mut self, key: &PrimaryKey) -> CoreResult<Entry> {
        let entry = self.primary.remove(key)?;
        if let Some(tags) = &entry.tags {
            self.tags.clear_entry_tags(key, tags)?;
        }
        self.forget_cached(&entry);
        Ok(entry)
    }

    /// Binds `tags` on an entry, returning its previous tag set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent, or a tag error;
    /// nothing changes on error.
    pub fn tag_entry(&mut self, key: &PrimaryKey, tags: &[Tag]) -> CoreResult<Option<TagSet>> {
        let entry = self
            .primary
            .get(key)
            .ok_or_else(|| CoreError::document_not_found(key.as_str()))?;
        let mut merged = entry.tag_set();
        merged.merge(tags)?;
        self.replace_tags(key, merged)
    }

    /// Unbinds the named tags, returning the previous tag set.
    ///
    /// Names that are not bound are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent.
    pub fn untag_entry(&mut self, key: &PrimaryKey, names: &[String]) -> CoreResult<Option<TagSet>> {
        let entry = self
            .primary
            .get(key)
            .ok_or_else(|| CoreError::document_not_found(key.as_str()))?;
        let mut remaining = entry.tag_set();
        for name in names {
            remaining.remove(name);
        }
        self.replace_tags(key, remaining)
    }

    /// Puts back a tag set captured before a tag or untag.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if the entry is gone.
    pub fn restore_tags(&mut self, key: &PrimaryKey, previous: Option<TagSet>) -> CoreResult<()> {
        self.replace_tags(key, previous.unwrap_or_default())?;
        Ok(())
    }

    fn replace_tags(&mut self, key: &PrimaryKey, tags: TagSet) -> CoreResult<Option<TagSet>> {
        let entry = self
            .primary
            .get_mut(key)
            .ok_or_else(|| CoreError::document_not_found(key.as_str()))?;
        if let Some(old) = &entry.tags {
            self.tags.clear_entry_tags(key, old)?;
        }
        self.tags.set_entry_tags(key, &tags);
        let previous = entry.tags.take();
        entry.set_tags(tags);
        Ok(previous)
    }

    /// Removes every entry, returning the previous indices.
    pub fn flush_all(&mut self) -> (PrimaryKeyIndex, TagIndexes) {
        if let Some(cache) = &self.cache {
            cache.purge();
        }
        (
            std::mem::take(&mut self.primary),
            std::mem::take(&mut self.tags),
        )
    }

    /// Reinstates indices returned by [`flush_all`](Self::flush_all).
    pub fn restore(&mut self, primary: PrimaryKeyIndex, tags: TagIndexes) {
        self.primary = primary;
        self.tags = tags;
    }

    /// Records where a committed `set` landed.
    ///
    /// The resident value is released unless values are loaded eagerly;
    /// the buffered strategy keeps it warm in the cache instead.
    pub fn mark_committed(&mut self, key: &PrimaryKey, value: &[u8], record: &EncodedRecord) {
        let Some(entry) = self.primary.get_mut(key) else {
            return;
        };
        if let Some(position) = record.value {
            entry.position = position;
        }
        entry.record_len = record.len;
        entry.committed = true;
        if self.load != LoadStrategy::Eager {
            entry.value = None;
        }
        if let Some(cache) = &self.cache {
            cache.add(entry.position.offset, value.to_vec());
        }
    }

    /// Points an entry at the record a vacuum rewrote it to.
    pub fn relocate(&mut self, key: &PrimaryKey, record: &EncodedRecord) {
        if let Some(entry) = self.primary.get_mut(key) {
            if let Some(position) = record.value {
                entry.position = position;
            }
            entry.record_len = record.len;
        }
    }

    /// Marks an entry committed without a log position.
    pub fn mark_committed_in_memory(&mut self, key: &PrimaryKey) {
        if let Some(entry) = self.primary.get_mut(key) {
            entry.committed = true;
        }
    }

    fn forget_cached(&self, entry: &Entry) {
        if let (Some(cache), true) = (&self.cache, entry.committed) {
            cache.remove(entry.position.offset);
        }
    }

    /// Applies one replayed record.
    ///
    /// `del`, `tag` and `untag` naming a missing key are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns tag errors from `tag` records.
    pub fn apply_record(&mut self, record: LogRecord) -> CoreResult<()> {
        match record.command {
            Command::Set { key, value, tags } => {
                let mut entry = Entry::new(key, value, tags);
                if let Some(position) = record.value_position {
                    entry.position = position;
                }
                entry.record_len = record.len;
                entry.committed = true;
                if self.load != LoadStrategy::Eager {
                    entry.value = None;
                }
                self.put_entry(entry, true)?;
            }
            Command::Delete { key } => {
                if self.primary.contains(&key) {
                    self.remove_entry(&key)?;
                } else {
                    warn!(key = %key, offset = record.offset, "replay: del of missing key skipped");
                }
            }
            Command::Tag { key, tags } => {
                if self.primary.contains(&key) {
                    self.tag_entry(&key, &tags)?;
                } else {
                    warn!(key = %key, offset = record.offset, "replay: tag of missing key skipped");
                }
            }
            Command::Untag { key, names } => {
                if self.primary.contains(&key) {
                    self.untag_entry(&key, &names)?;
                } else {
                    warn!(key = %key, offset = record.offset, "replay: untag of missing key skipped");
                }
            }
            Command::FlushAll => {
                self.flush_all();
            }
        }
        Ok(())
    }

    /// Returns the value bytes of an entry.
    ///
    /// Resident bytes are used first, then the cache, then the log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SourceFileReadFailed`] if the log read fails.
    pub fn value_of(&self, entry: &Entry) -> CoreResult<Vec<u8>> {
        if let Some(value) = &entry.value {
            return Ok(value.clone());
        }
        let offset = entry.position.offset;
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(offset)) {
            return Ok(cached);
        }
        let log = self.log.as_ref().ok_or_else(|| {
            CoreError::invariant(format!("{} has no resident value and no log", entry.key))
        })?;
        let value = log.read_value(entry.position)?;
        if let Some(cache) = &self.cache {
            cache.add(offset, value.clone());
        }
        Ok(value)
    }

    /// Builds a document snapshot of an entry.
    ///
    /// # Errors
    ///
    /// See [`value_of`](Self::value_of).
    pub fn document(&self, entry: &Entry) -> CoreResult<Document> {
        Ok(Document::new(entry, self.value_of(entry)?))
    }

    /// Sum of the `set` record lengths of the live entries.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.primary.iter().map(|entry| entry.record_len).sum()
    }

    /// Checks that the tag indices mirror the entries' tag sets.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolated`] describing the first
    /// mismatch.
    pub fn check_consistency(&self) -> CoreResult<()> {
        for (name, value, key) in self.tags.bindings() {
            let entry = self.primary.get(&key).ok_or_else(|| {
                CoreError::invariant(format!("tag {name} references missing key {key}"))
            })?;
            let bound = entry.tags().and_then(|tags| tags.get(&name));
            if !bound.is_some_and(|bound| bound.index_eq(&value)) {
                return Err(CoreError::invariant(format!(
                    "index binds {name}={value} to {key}, entry has {bound:?}"
                )));
            }
        }
        let expected: usize = self
            .primary
            .iter()
            .map(|entry| entry.tags().map_or(0, TagSet::len))
            .sum();
        if expected != self.tags.len() {
            return Err(CoreError::invariant(format!(
                "entries carry {expected} tags, indices hold {}",
                self.tags.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TagFilter;
    use crate::wal::CommandEncoder;
    use proptest::prelude::*;

    fn engine() -> Engine {
        Engine::new(None, None, LoadStrategy::Eager)
    }

    fn entry(key: &str, tags: Vec<Tag>) -> Entry {
        Entry::new(key.into(), key.as_bytes().to_vec(), TagSet::from_tags(tags).unwrap())
    }

    #[test]
    fn replace_rebinds_tags() {
        let mut engine = engine();
        engine
            .put_entry(entry("k", vec![Tag::bool("a", true), Tag::string("b", "x")]), false)
            .unwrap();
        let previous = engine
            .put_entry(entry("k", vec![Tag::int("c", 1)]), true)
            .unwrap();

        assert!(previous.is_some());
        assert!(engine.tags().candidates(&[TagFilter::eq("a", true)]).is_empty());
        assert_eq!(
            engine.tags().candidates(&[TagFilter::eq("c", 1_i64)]),
            vec![PrimaryKey::from("k")]
        );
        engine.check_consistency().unwrap();
    }

    #[test]
    fn insert_without_replace_changes_nothing() {
        let mut engine = engine();
        engine.put_entry(entry("k", vec![Tag::bool("a", true)]), false).unwrap();
        let err = engine
            .put_entry(entry("k", vec![Tag::bool("z", true)]), false)
            .unwrap_err();

        assert!(matches!(err, CoreError::KeyAlreadyExists { .. }));
        assert_eq!(engine.primary().count(), 1);
        assert_eq!(engine.tags().len(), 1);
        engine.check_consistency().unwrap();
    }

    #[test]
    fn remove_clears_every_binding() {
        let mut engine = engine();
        engine
            .put_entry(entry("k", vec![Tag::bool("a", true), Tag::string("b", "x")]), false)
            .unwrap();
        engine.remove_entry(&"k".into()).unwrap();

        assert_eq!(engine.tags().references(&"k".into()), 0);
        assert!(engine.tags().is_empty());
        assert!(matches!(
            engine.remove_entry(&"k".into()),
            Err(CoreError::DocumentNotFound { .. })
        ));
    }

    #[test]
    fn tag_and_untag_round_trip() {
        let mut engine = engine();
        engine.put_entry(entry("k", vec![Tag::int("n", 1)]), false).unwrap();

        let before = engine
            .tag_entry(&"k".into(), &[Tag::int("n", 2), Tag::bool("b", true)])
            .unwrap();
        assert_eq!(before.as_ref().and_then(|t| t.get_int("n")), Some(1));
        assert_eq!(engine.tags().len(), 2);

        let err = engine
            .tag_entry(&"k".into(), &[Tag::string("n", "two")])
            .unwrap_err();
        assert!(matches!(err, CoreError::ConflictingTagType { .. }));
        engine.check_consistency().unwrap();

        engine.untag_entry(&"k".into(), &["n".into(), "nope".into()]).unwrap();
        let tags = engine.primary().get(&"k".into()).unwrap().tags().cloned();
        assert_eq!(tags.map(|t| t.len()), Some(1));

        engine.restore_tags(&"k".into(), before).unwrap();
        let tags = engine.primary().get(&"k".into()).unwrap().tag_set();
        assert_eq!(tags.get_int("n"), Some(1));
        assert!(!tags.contains("b"));
        engine.check_consistency().unwrap();
    }

    #[test]
    fn flush_all_and_restore() {
        let mut engine = engine();
        engine.put_entry(entry("a", vec![Tag::bool("x", true)]), false).unwrap();
        engine.put_entry(entry("b", vec![]), false).unwrap();

        let (primary, tags) = engine.flush_all();
        assert!(engine.primary().is_empty());
        assert!(engine.tags().is_empty());

        engine.restore(primary, tags);
        assert_eq!(engine.primary().count(), 2);
        engine.check_consistency().unwrap();
    }

    #[test]
    fn replay_skips_stale_commands() {
        let mut engine = engine();
        let mut encoder = CommandEncoder::new(0);
        let commands = [
            Command::Delete { key: "ghost".into() },
            Command::Tag {
                key: "ghost".into(),
                tags: vec![Tag::bool("a", true)],
            },
            Command::Untag {
                key: "ghost".into(),
                names: vec!["a".into()],
            },
        ];
        for command in commands {
            let placed = encoder.encode(&command);
            engine
                .apply_record(LogRecord {
                    offset: placed.offset,
                    len: placed.len,
                    command,
                    value_position: None,
                })
                .unwrap();
        }
        assert!(engine.primary().is_empty());
    }

    #[test]
    fn value_without_log_is_invariant_violation() {
        let mut engine = engine();
        let mut e = entry("k", vec![]);
        e.value = None;
        engine.put_entry(e, false).unwrap();

        let stored = engine.primary().get(&"k".into()).unwrap();
        assert!(engine.value_of(stored).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn detects_drifted_index() {
        let mut engine = engine();
        engine.put_entry(entry("k", vec![Tag::bool("a", true)]), false).unwrap();
        engine.primary.get_mut(&"k".into()).unwrap().tags = None;

        assert!(engine.check_consistency().unwrap_err().is_invariant_violation());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, Vec<(u8, i64)>),
        Remove(u8),
        Tag(u8, u8, i64),
        Untag(u8, u8),
        Flush,
    }

    fn op() -> impl Strategy<Value = Op> {
        let name = 0u8..4;
        prop_oneof![
            4 => (0u8..8, prop::collection::vec((name.clone(), -3i64..3), 0..4))
                .prop_map(|(k, t)| Op::Put(k, t)),
            2 => (0u8..8).prop_map(Op::Remove),
            2 => (0u8..8, name.clone(), -3i64..3).prop_map(|(k, n, v)| Op::Tag(k, n, v)),
            2 => (0u8..8, name).prop_map(|(k, n)| Op::Untag(k, n)),
            1 => Just(Op::Flush),
        ]
    }

    proptest! {
        #[test]
        fn indices_mirror_entries(ops in prop::collection::vec(op(), 1..60)) {
            let mut engine = engine();
            for op in ops {
                let key = |k: u8| PrimaryKey::from(format!("k:{k}"));
                let name = |n: u8| format!("t{n}");
                // Logical errors (missing key) are expected; state must stay consistent.
                let _ = match op {
                    Op::Put(k, tags) => {
                        let tags: Vec<Tag> = tags.into_iter().map(|(n, v)| Tag::int(name(n), v)).collect();
                        let set = TagSet::from_tags(tags).unwrap();
                        engine.put_entry(Entry::new(key(k), vec![k], set), true).map(|_| ())
                    }
                    Op::Remove(k) => engine.remove_entry(&key(k)).map(|_| ()),
                    Op::Tag(k, n, v) => engine.tag_entry(&key(k), &[Tag::int(name(n), v)]).map(|_| ()),
                    Op::Untag(k, n) => engine.untag_entry(&key(k), &[name(n)]).map(|_| ()),
                    Op::Flush => {
                        engine.flush_all();
                        Ok(())
                    }
                };
                prop_assert!(engine.check_consistency().is_ok());
            }
        }
    }
}
