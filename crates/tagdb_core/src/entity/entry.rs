//! Stored records and the documents handed to callers.

use crate::entity::TagSet;
use crate::key::PrimaryKey;
use crate::types::Position;

/// One stored record, owned by the primary index.
///
/// Tag indices refer to entries by key only; they never hold an `Entry`.
#[derive(Debug, Clone)]
pub struct Entry {
    pub(crate) key: PrimaryKey,
    pub(crate) tags: Option<TagSet>,
    pub(crate) value: Option<Vec<u8>>,
    pub(crate) position: Position,
    pub(crate) record_len: u64,
    pub(crate) committed: bool,
}

impl Entry {
    /// Creates an uncommitted entry holding its value in memory.
    pub(crate) fn new(key: PrimaryKey, value: Vec<u8>, tags: TagSet) -> Self {
        Self {
            key,
            tags: if tags.is_empty() { None } else { Some(tags) },
            value: Some(value),
            position: Position::default(),
            record_len: 0,
            committed: false,
        }
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    /// Returns the tag set, if any tags are bound.
    #[must_use]
    pub fn tags(&self) -> Option<&TagSet> {
        self.tags.as_ref()
    }

    /// Returns the resident value bytes, if loaded.
    #[must_use]
    pub fn resident_value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Returns where the value lives in the log.
    #[must_use]
    pub fn position(&self) -> Position {
        self.position
    }

    /// Returns true once the entry's `set` record is in the log.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Replaces the tag set, normalizing an empty set to no tags.
    pub(crate) fn set_tags(&mut self, tags: TagSet) {
        self.tags = if tags.is_empty() { None } else { Some(tags) };
    }

    /// Returns a copy of the tag set, empty when no tags are bound.
    pub(crate) fn tag_set(&self) -> TagSet {
        self.tags.clone().unwrap_or_default()
    }
}

/// A read snapshot of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    key: PrimaryKey,
    tags: TagSet,
    value: Vec<u8>,
    position: Position,
}

impl Document {
    pub(crate) fn new(entry: &Entry, value: Vec<u8>) -> Self {
        Self {
            key: entry.key.clone(),
            tags: entry.tag_set(),
            value,
            position: entry.position,
        }
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    /// Returns the tags.
    #[must_use]
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Returns the value bytes.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Consumes the document, returning the value bytes.
    #[must_use]
    pub fn into_value(self) -> Vec<u8> {
        self.value
    }

    /// Returns where the value lives in the log.
    #[must_use]
    pub fn position(&self) -> Position {
        self.position
    }
}
