//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for TagDB.
///
/// Storage backends are **opaque byte stores**. TagDB owns the record
/// format; backends only move bytes.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `size` always reflects the bytes physically present, including the
///   prefix of a failed `append`
/// - Backends must be `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written. On failure some prefix
    /// of `data` may already be stored; `size()` tells how much.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails or `new_size` is greater
    /// than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole content of the storage with `data`.
    ///
    /// Either the old content or the new content survives a crash, never a
    /// mix of both.
    ///
    /// # Errors
    ///
    /// Returns an error if the new content cannot be written durably.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
