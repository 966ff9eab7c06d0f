//! Core type definitions for TagDB.

use std::fmt;

/// Location of a value's bytes inside the command log.
///
/// `offset` is the absolute file offset of the first value byte, `size`
/// its length. The offset is unique per stored value and doubles as the
/// value cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    /// Absolute byte offset in the log.
    pub offset: u64,
    /// Number of bytes.
    pub size: u64,
}

impl Position {
    /// Creates a new position.
    #[must_use]
    pub const fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Returns the offset one past the last byte.
    #[must_use]
    pub const fn end(self) -> u64 {
        self.offset + self.size
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.offset, self.size)
    }
}

/// Point-in-time counters describing a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatabaseStats {
    /// Number of stored documents.
    pub documents: usize,
    /// Current log size in bytes.
    pub log_size: u64,
    /// Bytes of the `set` records that produced the live documents.
    pub live_bytes: u64,
    /// Bytes a vacuum would reclaim.
    pub dead_bytes: u64,
    /// Advisory number of values held by the value cache.
    pub cached_values: usize,
}

impl DatabaseStats {
    /// Fraction of the log that is superseded (0.0 for an empty log).
    #[must_use]
    pub fn dead_ratio(&self) -> f64 {
        if self.log_size == 0 {
            0.0
        } else {
            self.dead_bytes as f64 / self.log_size as f64
        }
    }
}
