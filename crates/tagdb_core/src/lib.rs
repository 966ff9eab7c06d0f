//! # TagDB Core
//!
//! Core storage engine for TagDB, an embeddable single-file document store.
//!
//! This crate provides:
//! - Hierarchical primary keys (`user:1:pet:2`) with numeric-aware ordering
//! - Typed tags (bool, int, float, string) with secondary indices
//! - An append-only command log that is both data file and recovery log
//! - Range, prefix and glob scans combined with AND-ed tag filters
//! - Single-writer / multi-reader transactions with rollback
//! - Eager, lazy or LRU-buffered value residency
//! - Log compaction (vacuum), manual or automatic
//!
//! ## Example
//!
//! ```rust
//! use tagdb_core::{Database, QueryOptions, Tag, TagFilter, TagSet};
//!
//! let db = Database::open_in_memory()?;
//! db.write(|txn| {
//!     txn.insert("user:1", b"ada".to_vec(), TagSet::new().with(Tag::int("age", 36))?)?;
//!     txn.insert("user:2", b"bob".to_vec(), TagSet::new().with(Tag::int("age", 17))?)?;
//!     txn.insert("user:10", b"cy".to_vec(), TagSet::new().with(Tag::int("age", 52))?)
//! })?;
//!
//! let adults = db.keys(&QueryOptions::new().prefix("user:*").tag(TagFilter::int_ge("age", 18)))?;
//! assert_eq!(adults.len(), 2);
//! assert_eq!(adults[1].as_str(), "user:10");
//! # Ok::<(), tagdb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod background;
mod cache;
mod config;
mod database;
mod engine;
mod entity;
mod error;
mod index;
mod key;
mod query;
mod transaction;
mod types;
mod wal;

pub use cache::{CacheStats, ValueCache};
pub use config::{AutoVacuum, Config, EvictionCallback, LoadStrategy, Persistence};
pub use database::Database;
pub use engine::Engine;
pub use entity::{validate_tag_name, Document, Entry, FloatKey, Tag, TagKind, TagSet, TagValue};
pub use error::{CoreError, CoreResult};
pub use index::{HashTagIndex, OrderedTagIndex, PrimaryKeyIndex, TagIndex, TagIndexes};
pub use key::{KeyPattern, PrimaryKey};
pub use query::{CancelToken, Direction, KeyCondition, QueryOptions, TagCondition, TagFilter};
pub use transaction::{ReadTransaction, TransactionManager, TransactionStats, WriteTransaction};
pub use types::{DatabaseStats, Position};
pub use wal::{
    encode_command, Command, CommandEncoder, CommandKind, CommandLog, CommandReader,
    EncodedRecord, LogRecord, ReplaySummary, PADDING,
};

// Re-export storage types for convenience
pub use tagdb_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
