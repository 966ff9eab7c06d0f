//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// An append stopped after writing only part of its data.
    #[error("partial write: {written} of {expected} bytes written: {source}")]
    PartialWrite {
        /// Bytes that reached the storage.
        written: usize,
        /// Bytes that were requested.
        expected: usize,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Another process holds the storage file.
    #[error("storage locked: {0} is held by another process")]
    Locked(String),
}
