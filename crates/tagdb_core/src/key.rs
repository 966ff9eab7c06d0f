//! Hierarchical primary keys and key patterns.
//!
//! A key such as `user:10:pet:2` is split on `:` into segments. Keys are
//! ordered segment by segment:
//!
//! - two canonical integers (digits only, no leading zero) compare numerically
//! - an integer segment sorts before a non-integer segment
//! - any other pair compares lexicographically by bytes
//! - a key whose segments are a strict prefix of another sorts first
//!
//! So `user:2` sorts before `user:10`, and `user` before `user:1`.

use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

/// Separator between key segments.
pub const SEGMENT_SEPARATOR: char = ':';

/// Pattern segment that matches any key segment.
pub const WILDCARD: &str = "*";

/// A hierarchical document key.
#[derive(Clone)]
pub struct PrimaryKey {
    raw: String,
    segments: Vec<Range<usize>>,
}

impl PrimaryKey {
    /// Creates a key, splitting and caching its segments.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mut segments = Vec::new();
        let mut start = 0;
        for (idx, ch) in raw.char_indices() {
            if ch == SEGMENT_SEPARATOR {
                segments.push(start..idx);
                start = idx + ch.len_utf8();
            }
        }
        segments.push(start..raw.len());
        Self { raw, segments }
    }

    /// Creates a key that may be stored, rejecting the empty key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for an empty key.
    pub fn parse(raw: impl Into<String>) -> CoreResult<Self> {
        let key = Self::new(raw);
        key.validate()?;
        Ok(key)
    }

    /// Checks that the key may be stored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for an empty key.
    pub fn validate(&self) -> CoreResult<()> {
        if self.raw.is_empty() {
            return Err(CoreError::invalid_key("key must not be empty"));
        }
        Ok(())
    }

    /// Returns the raw key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns the segment at `index`, if present.
    #[must_use]
    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(|r| &self.raw[r.clone()])
    }

    /// Iterates over the segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.segments.iter().map(|r| &self.raw[r.clone()])
    }

    /// Returns true if every segment of `prefix` equals the segment at the
    /// same position in this key.
    #[must_use]
    pub fn has_segment_prefix(&self, prefix: &PrimaryKey) -> bool {
        prefix.segment_count() <= self.segment_count()
            && prefix.segments().zip(self.segments()).all(|(p, s)| p == s)
    }

    /// Returns true if this key matches the glob pattern.
    #[must_use]
    pub fn matches(&self, pattern: &KeyPattern) -> bool {
        pattern.matches(self)
    }
}

/// Returns true if `segment` is a canonical non-negative integer.
fn is_integer_segment(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    !bytes.is_empty()
        && bytes.iter().all(u8::is_ascii_digit)
        && (bytes.len() == 1 || bytes[0] != b'0')
}

/// Compares two key segments.
pub(crate) fn compare_segments(a: &str, b: &str) -> Ordering {
    match (is_integer_segment(a), is_integer_segment(b)) {
        // Canonical digit strings: longer means larger.
        (true, true) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

impl Ord for PrimaryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.segments().zip(other.segments()) {
            match compare_segments(a, b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        self.segment_count().cmp(&other.segment_count())
    }
}

impl PartialOrd for PrimaryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PrimaryKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for PrimaryKey {}

impl Hash for PrimaryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Debug for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrimaryKey({:?})", self.raw)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for PrimaryKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for PrimaryKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// A colon-segmented glob over keys, with `*` as a whole-segment wildcard.
///
/// Matching rules:
///
/// - the empty pattern and `*` match every key
/// - a pattern segment with no counterpart in the key only matches if it is `*`
/// - otherwise the segments must be equal, or the pattern segment is `*`
/// - key segments beyond the pattern's length are ignored
///
/// `user:*` therefore matches `user`, `user:5` and `user:5:pet:1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    raw: String,
    segments: Vec<String>,
}

impl KeyPattern {
    /// Parses a pattern.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = if raw.is_empty() {
            Vec::new()
        } else {
            raw.split(SEGMENT_SEPARATOR).map(str::to_owned).collect()
        };
        Self { raw, segments }
    }

    /// Returns the raw pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the pattern accepts every key.
    #[must_use]
    pub fn matches_all(&self) -> bool {
        self.segments.is_empty() || (self.segments.len() == 1 && self.segments[0] == WILDCARD)
    }

    /// Tests a key against the pattern.
    #[must_use]
    pub fn matches(&self, key: &PrimaryKey) -> bool {
        if self.matches_all() {
            return true;
        }
        self.segments
            .iter()
            .enumerate()
            .all(|(idx, pattern)| match key.segment(idx) {
                None => pattern == WILDCARD,
                Some(segment) => pattern == WILDCARD || pattern == segment,
            })
    }

    /// Returns the key formed by the segments before the first wildcard.
    ///
    /// All keys matching the pattern share this segment prefix, so they form
    /// one contiguous run in key order starting at the returned key. Returns
    /// `None` when the pattern starts with a wildcard.
    #[must_use]
    pub fn literal_prefix(&self) -> Option<PrimaryKey> {
        let literal: Vec<&str> = self
            .segments
            .iter()
            .take_while(|s| s.as_str() != WILDCARD)
            .map(String::as_str)
            .collect();
        if literal.is_empty() {
            None
        } else {
            Some(PrimaryKey::new(literal.join(":")))
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
