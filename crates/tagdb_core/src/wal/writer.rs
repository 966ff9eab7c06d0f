//! Command log writer and replay driver.

use crate::error::{CoreError, CoreResult};
use crate::types::Position;
use crate::wal::command::{Command, CommandEncoder, EncodedRecord, PADDING};
use crate::wal::reader::{CommandReader, LogRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tagdb_storage::StorageBackend;
use tracing::{error, warn};

/// Counters gathered while replaying a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
    /// Records read.
    pub records: u64,
    /// Bytes read, padding included.
    pub bytes: u64,
    /// Padding bytes skipped.
    pub padding: u64,
}

/// The append-only command log.
///
/// Appends are all-or-nothing: when the backend fails part-way through a
/// write, the log is cut back to its previous length and synced before the
/// error is returned.
pub struct CommandLog {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
    dirty: AtomicBool,
}

impl CommandLog {
    /// Creates a log over `backend`.
    ///
    /// With `sync_on_write` every append is fsynced before it returns;
    /// otherwise appends are only flushed and [`sync`](Self::sync) makes
    /// them durable.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
            dirty: AtomicBool::new(false),
        }
    }

    /// Appends raw, already encoded records.
    ///
    /// Returns the offset of the first byte.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DbFileWriteFailed`] if the write, or the sync in
    /// sync-on-write mode, fails. The log keeps its previous length.
    pub fn append(&self, bytes: &[u8]) -> CoreResult<u64> {
        let mut backend = self.backend.lock();
        self.write_locked(&mut **backend, bytes)
    }

    fn write_locked(&self, backend: &mut dyn StorageBackend, bytes: &[u8]) -> CoreResult<u64> {
        let before = backend.size().map_err(CoreError::DbFileWriteFailed)?;

        let offset = match backend.append(bytes) {
            Ok(offset) => offset,
            Err(err) => {
                Self::roll_back(backend, before);
                return Err(CoreError::DbFileWriteFailed(err));
            }
        };

        let persisted = if self.sync_on_write {
            backend.flush().and_then(|()| backend.sync())
        } else {
            backend.flush()
        };
        if let Err(err) = persisted {
            Self::roll_back(backend, before);
            return Err(CoreError::DbFileWriteFailed(err));
        }

        if !self.sync_on_write {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(offset)
    }

    /// Encodes and appends a single command.
    ///
    /// # Errors
    ///
    /// See [`append`](Self::append).
    pub fn append_command(&self, command: &Command) -> CoreResult<EncodedRecord> {
        self.append_commands(std::slice::from_ref(command))?
            .pop()
            .ok_or_else(|| CoreError::invariant("encoder produced no record"))
    }

    /// Encodes `commands` as one contiguous write.
    ///
    /// # Errors
    ///
    /// See [`append`](Self::append). Either every command is logged or none.
    pub fn append_commands(&self, commands: &[Command]) -> CoreResult<Vec<EncodedRecord>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        let mut backend = self.backend.lock();
        let base = backend.size().map_err(CoreError::DbFileWriteFailed)?;

        let mut encoder = CommandEncoder::new(base);
        let records: Vec<EncodedRecord> = commands.iter().map(|c| encoder.encode(c)).collect();
        let offset = self.write_locked(&mut **backend, &encoder.finish())?;
        if offset != base {
            return Err(CoreError::invariant(format!(
                "log appended at {offset}, expected {base}"
            )));
        }
        Ok(records)
    }

    fn roll_back(backend: &mut dyn StorageBackend, before: u64) {
        match backend.size() {
            Ok(size) if size > before => {
                warn!(
                    partial_bytes = size - before,
                    offset = before,
                    "rolling back partial log write"
                );
                if let Err(err) = backend.truncate(before).and_then(|()| backend.sync()) {
                    error!(error = %err, offset = before, "failed to roll back partial write");
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "cannot determine log size after failed write");
            }
        }
    }

    /// Writes `len` padding bytes.
    ///
    /// # Errors
    ///
    /// See [`append`](Self::append).
    pub fn pad(&self, len: usize) -> CoreResult<u64> {
        self.append(&vec![PADDING; len])
    }

    /// Returns the log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Reads the bytes at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SourceFileReadFailed`] if the read fails.
    pub fn read_value(&self, position: Position) -> CoreResult<Vec<u8>> {
        let len = usize::try_from(position.size)
            .map_err(|_| CoreError::invariant(format!("value at {position} too large")))?;
        self.backend
            .lock()
            .read_at(position.offset, len)
            .map_err(CoreError::SourceFileReadFailed)
    }

    /// Returns true if appends happened since the last sync.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Makes every append durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend sync fails; the log stays dirty.
    pub fn sync(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        if self.dirty.swap(false, Ordering::AcqRel) {
            if let Err(err) = backend.flush().and_then(|()| backend.sync()) {
                self.dirty.store(true, Ordering::Release);
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Reads every record in order, handing each to `apply`.
    ///
    /// # Errors
    ///
    /// Stops at the first structural error or error from `apply`.
    pub fn replay<F>(&self, load_values: bool, mut apply: F) -> CoreResult<ReplaySummary>
    where
        F: FnMut(LogRecord) -> CoreResult<()>,
    {
        let backend = self.backend.lock();
        let mut reader = CommandReader::new(&**backend, load_values)?;
        let mut summary = ReplaySummary::default();
        for record in reader.by_ref() {
            apply(record?)?;
            summary.records += 1;
        }
        summary.bytes = reader.cursor();
        summary.padding = reader.padding_skipped();
        Ok(summary)
    }

    /// Atomically replaces the log with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DbFileWriteFailed`] if the new log cannot be
    /// written; the old log is left in place.
    pub fn rewrite(&self, bytes: &[u8]) -> CoreResult<()> {
        self.backend
            .lock()
            .rewrite(bytes)
            .map_err(CoreError::DbFileWriteFailed)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for CommandLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLog")
            .field("sync_on_write", &self.sync_on_write)
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}
