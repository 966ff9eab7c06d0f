//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Suitable for unit tests, integration tests and ephemeral databases.
/// Clones share the same underlying buffer, which lets a test keep a handle
/// on the bytes a database wrote.
///
/// # Example
///
/// ```rust
/// use tagdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let offset = backend.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, current_size
                ),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn rewrite(&mut self, new_data: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        data.clear();
        data.extend_from_slice(new_data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_append_returns_correct_offset() {
        let mut backend = InMemoryBackend::new();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn memory_read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn memory_truncate() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();

        assert_eq!(backend.data(), b"hello");
        assert!(backend.truncate(6).is_err());
    }

    #[test]
    fn clones_share_buffer() {
        let mut backend = InMemoryBackend::new();
        let observer = backend.clone();
        backend.append(b"shared").unwrap();

        assert_eq!(observer.data(), b"shared");
    }

    #[test]
    fn memory_rewrite() {
        let mut backend = InMemoryBackend::with_data(b"stale bytes".to_vec());
        backend.rewrite(b"live").unwrap();

        assert_eq!(backend.data(), b"live");
        assert_eq!(backend.size().unwrap(), 4);
    }

    proptest! {
        #[test]
        fn appends_are_contiguous(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)) {
            let mut backend = InMemoryBackend::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                let offset = backend.append(chunk).unwrap();
                prop_assert_eq!(offset, expected.len() as u64);
                expected.extend_from_slice(chunk);
            }
            prop_assert_eq!(backend.data(), expected);
        }
    }
}
