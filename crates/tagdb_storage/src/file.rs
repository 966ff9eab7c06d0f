//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// The file is held under an exclusive advisory lock for as long as the
/// backend lives, so a second process opening the same log fails with
/// [`StorageError::Locked`].
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
/// - `rewrite()` writes a sibling temp file, syncs it and renames it over
///   the original
///
/// # Example
///
/// ```no_run
/// use tagdb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("data.tdb")).unwrap();
/// let offset = backend.append(b"persistent data").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created, or if
    /// another process holds its lock.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".rewrite");
        self.path.with_file_name(name)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();
        let offset = *size;

        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::Start(offset))?;

        let mut written = 0usize;
        while written < data.len() {
            let failure = match file.write(&data[written..]) {
                Ok(0) => io::Error::new(io::ErrorKind::WriteZero, "storage accepted no bytes"),
                Ok(n) => {
                    written += n;
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => e,
            };

            *size = offset + written as u64;
            if written == 0 {
                return Err(StorageError::Io(failure));
            }
            return Err(StorageError::PartialWrite {
                written,
                expected: data.len(),
                source: failure,
            });
        }

        *size = offset + written as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, *size
                ),
            )));
        }

        file.set_len(new_size)?;
        file.seek(SeekFrom::Start(new_size))?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        let temp_path = self.temp_path();
        let mut temp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        temp.write_all(data)?;
        temp.sync_all()?;

        if temp.try_lock_exclusive().is_err() {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::Locked(temp_path.display().to_string()));
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        fs::rename(&temp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            // Directory fsync makes the rename durable on POSIX systems.
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        *file = temp;
        *size = data.len() as u64;
        Ok(())
    }
}
