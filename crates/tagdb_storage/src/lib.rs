//! # TagDB Storage
//!
//! Storage backend trait and implementations for TagDB.
//!
//! Backends are **opaque byte stores**: they append, read back and sync bytes
//! without knowing anything about the command log framing that TagDB writes
//! into them.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, sync, truncate, rewrite)
//! - No knowledge of the TagDB record grammar
//! - Must be `Send + Sync` for concurrent readers
//! - A failed append reports how far the storage actually grew, so callers
//!   can cut a half-written record back off
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tagdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
