//! Find and scan composition.
//!
//! A query combines at most one key condition (range, prefix or glob) with
//! any number of tag filters joined by AND. Without tag filters the primary
//! index is traversed directly; with them the tag indices supply candidate
//! keys, which are ordered, re-resolved through the primary index and
//! re-checked against every condition.

use crate::engine::Engine;
use crate::entity::{Entry, TagSet, TagValue};
use crate::error::CoreResult;
use crate::key::{KeyPattern, PrimaryKey};
use std::ops::{Bound, RangeBounds};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest key first.
    #[default]
    Ascending,
    /// Largest key first.
    Descending,
}

/// Restriction on the keys a query visits.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCondition {
    /// Ascending: `from <= key < to`. Descending: `to < key <= from`.
    Range {
        /// Starting bound.
        from: PrimaryKey,
        /// Ending bound.
        to: PrimaryKey,
    },
    /// Keys matching the pattern, traversed from its literal prefix.
    Prefix(KeyPattern),
    /// Keys matching the pattern, checked against every key.
    Glob(KeyPattern),
}

impl KeyCondition {
    fn accepts(&self, key: &PrimaryKey, direction: Direction) -> bool {
        match (self, direction) {
            (Self::Range { from, to }, Direction::Ascending) => from <= key && key < to,
            (Self::Range { from, to }, Direction::Descending) => to < key && key <= from,
            (Self::Prefix(pattern) | Self::Glob(pattern), _) => pattern.matches(key),
        }
    }
}

/// A predicate on one tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagCondition {
    /// The tag equals the value. Floats compare by canonical bits.
    Equals(TagValue),
    /// The integer tag lies within the bounds.
    IntRange {
        /// Lower bound.
        lower: Bound<i64>,
        /// Upper bound.
        upper: Bound<i64>,
    },
}

/// A named tag predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct TagFilter {
    name: String,
    condition: TagCondition,
}

impl TagFilter {
    /// Creates a filter from a name and condition.
    pub fn new(name: impl Into<String>, condition: TagCondition) -> Self {
        Self {
            name: name.into(),
            condition,
        }
    }

    /// Matches tags equal to `value`.
    pub fn eq(name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self::new(name, TagCondition::Equals(value.into()))
    }

    /// Matches integer tags `< value`.
    pub fn int_lt(name: impl Into<String>, value: i64) -> Self {
        Self::int_range(name, Bound::Unbounded, Bound::Excluded(value))
    }

    /// Matches integer tags `<= value`.
    pub fn int_le(name: impl Into<String>, value: i64) -> Self {
        Self::int_range(name, Bound::Unbounded, Bound::Included(value))
    }

    /// Matches integer tags `> value`.
    pub fn int_gt(name: impl Into<String>, value: i64) -> Self {
        Self::int_range(name, Bound::Excluded(value), Bound::Unbounded)
    }

    /// Matches integer tags `>= value`.
    pub fn int_ge(name: impl Into<String>, value: i64) -> Self {
        Self::int_range(name, Bound::Included(value), Bound::Unbounded)
    }

    /// Matches integer tags in `low..=high`.
    pub fn int_between(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self::int_range(name, Bound::Included(low), Bound::Included(high))
    }

    fn int_range(name: impl Into<String>, lower: Bound<i64>, upper: Bound<i64>) -> Self {
        Self::new(name, TagCondition::IntRange { lower, upper })
    }

    /// Returns the tag name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the condition.
    #[must_use]
    pub fn condition(&self) -> &TagCondition {
        &self.condition
    }

    /// Returns true if `tags` satisfies this filter.
    #[must_use]
    pub fn matches(&self, tags: &TagSet) -> bool {
        let Some(value) = tags.get(&self.name) else {
            return false;
        };
        match (&self.condition, value) {
            (TagCondition::Equals(expected), actual) => expected.index_eq(actual),
            (TagCondition::IntRange { lower, upper }, TagValue::Int(v)) => {
                (*lower, *upper).contains(v)
            }
            (TagCondition::IntRange { .. }, _) => false,
        }
    }
}

/// Shared flag that stops a running find or scan.
///
/// Cancellation is checked before each candidate entry; a cancelled query
/// returns what it gathered so far without an error.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Parameters of a find or scan.
///
/// # Example
///
/// ```rust
/// use tagdb_core::{KeyPattern, QueryOptions, TagFilter};
///
/// let options = QueryOptions::new()
///     .prefix(KeyPattern::new("user:*"))
///     .tag(TagFilter::eq("active", true))
///     .tag(TagFilter::int_ge("age", 18))
///     .descending()
///     .limit(10);
/// assert_eq!(options.tag_filters().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    direction: Direction,
    key: Option<KeyCondition>,
    tags: Vec<TagFilter>,
    skip: usize,
    limit: Option<usize>,
    cancel: Option<CancelToken>,
}

impl QueryOptions {
    /// Creates options visiting every entry in ascending order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Visits in descending key order.
    #[must_use]
    pub fn descending(self) -> Self {
        self.with_direction(Direction::Descending)
    }

    /// Restricts keys to a range. See [`KeyCondition::Range`].
    #[must_use]
    pub fn range(mut self, from: impl Into<PrimaryKey>, to: impl Into<PrimaryKey>) -> Self {
        self.key = Some(KeyCondition::Range {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Restricts keys to a prefix pattern.
    #[must_use]
    pub fn prefix(mut self, pattern: impl Into<KeyPattern>) -> Self {
        self.key = Some(KeyCondition::Prefix(pattern.into()));
        self
    }

    /// Restricts keys to a glob pattern.
    #[must_use]
    pub fn glob(mut self, pattern: impl Into<KeyPattern>) -> Self {
        self.key = Some(KeyCondition::Glob(pattern.into()));
        self
    }

    /// Adds a tag filter.
    #[must_use]
    pub fn tag(mut self, filter: TagFilter) -> Self {
        self.tags.push(filter);
        self
    }

    /// Skips the first `n` matches.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Stops after `n` matches.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Returns the direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the key condition.
    #[must_use]
    pub fn key_condition(&self) -> Option<&KeyCondition> {
        self.key.as_ref()
    }

    /// Returns the tag filters.
    #[must_use]
    pub fn tag_filters(&self) -> &[TagFilter] {
        &self.tags
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Returns true if `entry` satisfies the key condition and every filter.
    #[must_use]
    pub fn accepts(&self, entry: &Entry) -> bool {
        if let Some(condition) = &self.key {
            if !condition.accepts(entry.key(), self.direction) {
                return false;
            }
        }
        if self.tags.is_empty() {
            return true;
        }
        let Some(tags) = entry.tags() else {
            return false;
        };
        self.tags.iter().all(|filter| filter.matches(tags))
    }
}

/// Runs a query, handing accepted entries to `receiver` in order.
///
/// The receiver returns `Ok(false)` to stop early.
pub(crate) fn execute<F>(engine: &Engine, options: &QueryOptions, mut receiver: F) -> CoreResult<()>
where
    F: FnMut(&Entry) -> CoreResult<bool>,
{
    if options.limit == Some(0) {
        return Ok(());
    }

    let mut skipped = 0;
    let mut emitted = 0;
    let mut visit = |entry: &Entry| -> CoreResult<bool> {
        if options.is_cancelled() {
            return Ok(false);
        }
        if !options.accepts(entry) {
            return Ok(true);
        }
        if skipped < options.skip {
            skipped += 1;
            return Ok(true);
        }
        emitted += 1;
        let more = receiver(entry)?;
        Ok(more && options.limit.map_or(true, |limit| emitted < limit))
    };

    let primary = engine.primary();
    let descending = options.direction == Direction::Descending;

    if !options.tags.is_empty() {
        let tags = engine.tags();
        if options.tags.iter().any(|filter| tags.rules_out(filter)) {
            return Ok(());
        }
        let mut keys = tags.candidates(&options.tags);
        keys.sort();
        if descending {
            keys.reverse();
        }
        return primary.find_by_keys(&keys, visit);
    }

    match (&options.key, descending) {
        (None | Some(KeyCondition::Glob(_)), false) => primary.ascend(visit),
        (None | Some(KeyCondition::Glob(_)), true) => primary.descend(visit),
        (Some(KeyCondition::Range { from, to }), false) => primary.ascend_range(from, to, visit),
        (Some(KeyCondition::Range { from, to }), true) => primary.descend_range(from, to, visit),
        (Some(KeyCondition::Prefix(pattern)), false) => primary.ascend_prefix(pattern, visit),
        (Some(KeyCondition::Prefix(pattern)), true) => primary.descend_prefix(pattern, visit),
    }
}
