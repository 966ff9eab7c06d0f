//! Database facade, open-time replay and vacuum.

use crate::background::BackgroundWorker;
use crate::cache::{CacheStats, ValueCache};
use crate::config::{Config, LoadStrategy, Persistence};
use crate::engine::Engine;
use crate::entity::{Document, Tag, TagSet};
use crate::error::{CoreError, CoreResult};
use crate::key::PrimaryKey;
use crate::query::QueryOptions;
use crate::transaction::{ReadTransaction, TransactionManager, TransactionStats, WriteTransaction};
use crate::types::DatabaseStats;
use crate::wal::{Command, CommandEncoder, CommandLog};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tagdb_storage::{FileBackend, StorageBackend};
use tracing::{debug, error, info, warn};

/// State shared with the background worker.
struct Shared {
    manager: TransactionManager,
    log: Option<Arc<CommandLog>>,
}

impl Shared {
    fn stats(&self) -> CoreResult<DatabaseStats> {
        let engine = self.manager.engine();
        let log_size = match &self.log {
            Some(log) => log.size()?,
            None => 0,
        };
        let live_bytes = engine.live_bytes();
        Ok(DatabaseStats {
            documents: engine.primary().count(),
            log_size,
            live_bytes,
            dead_bytes: log_size.saturating_sub(live_bytes),
            cached_values: engine.cache().map_or(0, |cache| cache.len()),
        })
    }

    /// Rewrites the log as one `set` per live document.
    fn vacuum(&self) -> CoreResult<u64> {
        let reclaimed = self.rewrite_log();
        self.manager.deliver_evictions();
        reclaimed
    }

    /// Holds the engine exclusively, so no transaction runs meanwhile.
    fn rewrite_log(&self) -> CoreResult<u64> {
        let Some(log) = &self.log else {
            return Err(CoreError::invalid_operation(
                "vacuum needs a persistent log",
            ));
        };
        let mut engine = self.manager.engine_mut();
        let started = Instant::now();
        let before = log.size()?;
        info!(log_size = before, documents = engine.primary().count(), "vacuum started");

        let mut encoder = CommandEncoder::new(0);
        let mut placed = Vec::with_capacity(engine.primary().count());
        for entry in engine.primary().iter() {
            let command = Command::Set {
                key: entry.key().clone(),
                value: engine.value_of(entry)?,
                tags: entry.tag_set(),
            };
            placed.push((entry.key().clone(), encoder.encode(&command)));
        }
        let bytes = encoder.finish();
        log.rewrite(&bytes)?;

        // Cache keys are log offsets, which just changed.
        if let Some(cache) = engine.cache() {
            cache.purge();
        }
        for (key, record) in &placed {
            engine.relocate(key, record);
        }

        let after = bytes.len() as u64;
        info!(
            log_size = after,
            reclaimed = before.saturating_sub(after),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "vacuum finished"
        );
        Ok(before.saturating_sub(after))
    }

    fn maintenance_tick(&self, persistence: Persistence, auto: Option<&AutoVacuumState>) {
        if let (Persistence::Async, Some(log)) = (persistence, &self.log) {
            if let Err(err) = log.sync() {
                warn!(error = %err, "background sync failed");
            }
        }
        if let Some(auto) = auto {
            auto.tick(self);
        }
    }
}

struct AutoVacuumState {
    thresholds: crate::config::AutoVacuum,
    last_check: Mutex<Instant>,
}

impl AutoVacuumState {
    fn tick(&self, shared: &Shared) {
        {
            let mut last = self.last_check.lock();
            if last.elapsed() < self.thresholds.interval {
                return;
            }
            *last = Instant::now();
        }
        let stats = match shared.stats() {
            Ok(stats) => stats,
            Err(err) => {
                warn!(error = %err, "auto-vacuum could not read stats");
                return;
            }
        };
        if stats.dead_bytes < self.thresholds.min_dead_bytes
            || stats.dead_ratio() < self.thresholds.min_dead_ratio
        {
            debug!(dead_bytes = stats.dead_bytes, "auto-vacuum thresholds not met");
            return;
        }
        if let Err(err) = shared.vacuum() {
            warn!(error = %err, "auto-vacuum failed");
        }
    }
}

/// The main database handle.
///
/// `Database` owns one command log, replays it on open and serves
/// transactions against the rebuilt indices. It is `Send + Sync`; share it
/// behind an `Arc` for concurrent readers.
///
/// # Opening a Database
///
/// ```rust
/// use tagdb_core::{Database, QueryOptions, Tag, TagFilter, TagSet};
///
/// let db = Database::open_in_memory()?;
/// db.write(|txn| {
///     let tags = TagSet::new().with(Tag::bool("admin", true))?;
///     txn.insert("user:1", br#"{"name":"ada"}"#.to_vec(), tags)
/// })?;
///
/// let admins = db.find(&QueryOptions::new().tag(TagFilter::eq("admin", true)))?;
/// assert_eq!(admins.len(), 1);
/// # Ok::<(), tagdb_core::CoreError>(())
/// ```
pub struct Database {
    config: Config,
    path: Option<PathBuf>,
    shared: Arc<Shared>,
    worker: Mutex<Option<BackgroundWorker>>,
    is_open: RwLock<bool>,
}

impl Database {
    /// Opens or creates the log file at `path` with default configuration.
    ///
    /// # Errors
    ///
    /// See [`open_with_config`](Self::open_with_config).
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens the log file at `path` and replays it.
    ///
    /// Under [`Persistence::InMemory`] the path is ignored and nothing is
    /// read or written.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file is missing and `create_if_missing` is false (`InvalidOperation`)
    /// - Another handle holds the file lock (`Storage`)
    /// - Any record fails to parse or apply (`CommandInvalid`, `UnexpectedEof`, ...)
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        if config.persistence == Persistence::InMemory {
            return Self::build(config, None, None);
        }
        if !config.create_if_missing && !path.exists() {
            return Err(CoreError::invalid_operation(format!(
                "{} does not exist and create_if_missing is false",
                path.display()
            )));
        }
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::build(config, Some(Box::new(backend)), Some(path.to_path_buf()))
    }

    /// Opens a database over a caller-supplied backend and replays it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for [`Persistence::InMemory`], which has no
    /// use for a backend, and replay errors otherwise.
    pub fn open_with_backend(backend: Box<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        if config.persistence == Persistence::InMemory {
            return Err(CoreError::invalid_operation(
                "in-memory persistence does not take a storage backend",
            ));
        }
        Self::build(config, Some(backend), None)
    }

    /// Opens an empty database that is never persisted.
    ///
    /// # Errors
    ///
    /// Only fails if the configuration is rejected.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::build(
            Config::default().persistence(Persistence::InMemory),
            None,
            None,
        )
    }

    fn build(
        config: Config,
        backend: Option<Box<dyn StorageBackend>>,
        path: Option<PathBuf>,
    ) -> CoreResult<Self> {
        let log = backend.map(|backend| Arc::new(CommandLog::new(backend, config.sync_on_write())));
        let cache = (config.load_strategy == LoadStrategy::Buffered).then(|| {
            Arc::new(ValueCache::new(
                config.cache_capacity_bytes,
                config.cache_shards,
                config.on_evict.clone(),
            ))
        });
        let mut engine = Engine::new(log.clone(), cache, config.load_strategy);

        if let Some(log) = &log {
            let started = Instant::now();
            let load_values = engine.load_strategy() == LoadStrategy::Eager;
            let summary = log
                .replay(load_values, |record| engine.apply_record(record))
                .map_err(|err| {
                    error!(error = %err, path = ?path, "replay failed, database not opened");
                    err
                })?;
            info!(
                records = summary.records,
                bytes = summary.bytes,
                padding = summary.padding,
                documents = engine.primary().count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "log replayed"
            );
        }

        let shared = Arc::new(Shared {
            manager: TransactionManager::new(engine),
            log,
        });
        let worker = Self::spawn_worker(&config, &shared)?;
        info!(path = ?path, persistence = ?config.persistence, load = ?config.load_strategy, "database opened");

        Ok(Self {
            config,
            path,
            shared,
            worker: Mutex::new(worker),
            is_open: RwLock::new(true),
        })
    }

    fn spawn_worker(config: &Config, shared: &Arc<Shared>) -> CoreResult<Option<BackgroundWorker>> {
        if shared.log.is_none() || !config.needs_background() {
            return Ok(None);
        }
        let mut period: Option<Duration> = None;
        if config.persistence == Persistence::Async {
            period = Some(config.sync_interval);
        }
        let auto = config.auto_vacuum.map(|thresholds| {
            period = Some(period.map_or(thresholds.interval, |p| p.min(thresholds.interval)));
            AutoVacuumState {
                thresholds,
                last_check: Mutex::new(Instant::now()),
            }
        });
        let Some(period) = period else {
            return Ok(None);
        };

        let persistence = config.persistence;
        let shared = Arc::clone(shared);
        let worker = BackgroundWorker::spawn("tagdb-maintenance", period, move || {
            shared.maintenance_tick(persistence, auto.as_ref());
        })?;
        Ok(Some(worker))
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Runs `f` in a read transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` after [`close`](Self::close), otherwise
    /// whatever `f` returns.
    pub fn read<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadTransaction<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        self.shared.manager.read(f)
    }

    /// Runs `f` in a write transaction, committing if it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` after [`close`](Self::close), the
    /// callback's error, or a log write error. In every error case the
    /// indices and the log are left as they were.
    pub fn write<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        self.shared.manager.write(f)
    }

    // ========================================================================
    // Single-operation conveniences
    // ========================================================================

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns `KeyAlreadyExists` if the key is stored.
    pub fn insert(
        &self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        tags: TagSet,
    ) -> CoreResult<()> {
        self.write(|txn| txn.insert(key, value, tags))
    }

    /// Inserts or replaces a document. Returns true if one was replaced.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for an empty key, or a log write error.
    pub fn insert_or_replace(
        &self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        tags: TagSet,
    ) -> CoreResult<bool> {
        self.write(|txn| txn.insert_or_replace(key, value, tags))
    }

    /// Removes a document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if absent.
    pub fn remove(&self, key: &str) -> CoreResult<()> {
        self.write(|txn| txn.remove(key))
    }

    /// Binds tags on a document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` or a tag type error.
    pub fn tag(&self, key: &str, tags: &[Tag]) -> CoreResult<()> {
        self.write(|txn| txn.tag(key, tags))
    }

    /// Removes the named tags from a document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if absent.
    pub fn untag(&self, key: &str, names: &[&str]) -> CoreResult<()> {
        self.write(|txn| txn.untag(key, names))
    }

    /// Removes every document.
    ///
    /// # Errors
    ///
    /// Returns a log write error.
    pub fn flush_all(&self) -> CoreResult<()> {
        self.write(|txn| {
            txn.flush_all();
            Ok(())
        })
    }

    /// Returns the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `DocumentNotFound` if absent.
    pub fn get(&self, key: &str) -> CoreResult<Document> {
        self.read(|txn| txn.get(key))
    }

    /// Returns every document matching `options`.
    ///
    /// # Errors
    ///
    /// Returns a log read error.
    pub fn find(&self, options: &QueryOptions) -> CoreResult<Vec<Document>> {
        self.read(|txn| txn.find(options))
    }

    /// Hands each matching document to `receiver` until it returns
    /// `Ok(false)`. The read lock is held throughout.
    ///
    /// # Errors
    ///
    /// Returns the receiver's error or a log read error.
    pub fn scan<F>(&self, options: &QueryOptions, receiver: F) -> CoreResult<()>
    where
        F: FnMut(Document) -> CoreResult<bool>,
    {
        self.read(|txn| txn.scan(options, receiver))
    }

    /// Returns the keys matching `options`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` after close.
    pub fn keys(&self, options: &QueryOptions) -> CoreResult<Vec<PrimaryKey>> {
        self.read(|txn| txn.keys(options))
    }

    /// Returns the number of documents.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shared.manager.engine().primary().count()
    }

    /// Returns true if `key` is stored.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        self.shared
            .manager
            .engine()
            .primary()
            .contains(&PrimaryKey::from(key))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Compacts the log to one `set` record per live document.
    ///
    /// Returns the number of bytes reclaimed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for in-memory databases, or a storage
    /// error; on error the old log is still in place.
    pub fn vacuum(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        self.shared.vacuum()
    }

    /// Returns size and occupancy counters.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the log size cannot be read.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        self.shared.stats()
    }

    /// Returns transaction outcome counters.
    #[must_use]
    pub fn transaction_stats(&self) -> TransactionStats {
        self.shared.manager.stats()
    }

    /// Returns value cache counters, if the buffered strategy is in use.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.shared.manager.engine().cache().map(|cache| cache.stats())
    }

    /// Checks that the tag indices mirror every document's tags.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` describing the first mismatch.
    pub fn verify_indices(&self) -> CoreResult<()> {
        self.shared.manager.engine().check_consistency()
    }

    /// Forces buffered appends to stable storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        match &self.shared.log {
            Some(log) => log.sync(),
            None => Ok(()),
        }
    }

    /// Stops the background worker and syncs the log.
    ///
    /// Further transactions fail with `InvalidOperation`. Closing twice is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the final sync fails.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
        }
        self.sync()?;
        *is_open = false;
        info!(path = ?self.path, "database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::invalid_operation("database is closed"))
        }
    }

    /// Returns the database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the log file path, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("is_open", &self.is_open())
            .field("documents", &self.count())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "close on drop failed");
        }
    }
}
