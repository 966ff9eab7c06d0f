//! Database configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with the cache key (log offset) and bytes of every value
/// evicted from the value cache.
///
/// Evictions are reported after the transaction that caused them releases
/// the engine lock, so the callback may call back into the database.
pub type EvictionCallback = Arc<dyn Fn(u64, &[u8]) + Send + Sync>;

/// How committed commands reach durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistence {
    /// fsync after every committed write transaction.
    #[default]
    Sync,
    /// fsync from a background timer every [`Config::sync_interval`].
    ///
    /// Durability only extends to the last timer flush.
    Async,
    /// Nothing is logged; the database lives and dies with the process.
    InMemory,
}

/// Whether document values stay resident in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// Every value is kept in memory.
    #[default]
    Eager,
    /// Values are re-read from the log on every access.
    Lazy,
    /// Values are re-read from the log through a bounded LRU cache.
    Buffered,
}

/// Thresholds for automatic log compaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoVacuum {
    /// How often the thresholds are checked.
    pub interval: Duration,
    /// Minimum number of superseded bytes before a vacuum runs.
    pub min_dead_bytes: u64,
    /// Minimum fraction (0.0..=1.0) of the log that must be superseded.
    pub min_dead_ratio: f64,
}

impl Default for AutoVacuum {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            min_dead_bytes: 1024 * 1024,
            min_dead_ratio: 0.5,
        }
    }
}

/// Configuration for opening a database.
#[derive(Clone)]
pub struct Config {
    /// Whether to create the log file if it doesn't exist.
    pub create_if_missing: bool,

    /// Durability strategy.
    pub persistence: Persistence,

    /// Interval of the background fsync under [`Persistence::Async`].
    pub sync_interval: Duration,

    /// Value residency strategy.
    pub load_strategy: LoadStrategy,

    /// Total byte budget of the value cache (buffered load only).
    pub cache_capacity_bytes: usize,

    /// Number of independently locked cache shards.
    pub cache_shards: usize,

    /// Optional eviction hook for the value cache.
    pub on_evict: Option<EvictionCallback>,

    /// Automatic vacuum thresholds; `None` disables auto-vacuum.
    pub auto_vacuum: Option<AutoVacuum>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            persistence: Persistence::Sync,
            sync_interval: Duration::from_secs(1),
            load_strategy: LoadStrategy::Eager,
            cache_capacity_bytes: 64 * 1024 * 1024, // 64 MB
            cache_shards: 16,
            on_evict: None,
            auto_vacuum: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("create_if_missing", &self.create_if_missing)
            .field("persistence", &self.persistence)
            .field("sync_interval", &self.sync_interval)
            .field("load_strategy", &self.load_strategy)
            .field("cache_capacity_bytes", &self.cache_capacity_bytes)
            .field("cache_shards", &self.cache_shards)
            .field("on_evict", &self.on_evict.is_some())
            .field("auto_vacuum", &self.auto_vacuum)
            .finish()
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the log file if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the persistence strategy.
    #[must_use]
    pub const fn persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// Sets the background fsync interval used by [`Persistence::Async`].
    #[must_use]
    pub const fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the value load strategy.
    #[must_use]
    pub const fn load_strategy(mut self, strategy: LoadStrategy) -> Self {
        self.load_strategy = strategy;
        self
    }

    /// Sets the value cache size and shard count.
    #[must_use]
    pub const fn cache(mut self, capacity_bytes: usize, shards: usize) -> Self {
        self.cache_capacity_bytes = capacity_bytes;
        self.cache_shards = shards;
        self
    }

    /// Installs a value cache eviction callback.
    #[must_use]
    pub fn on_evict<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, &[u8]) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(callback));
        self
    }

    /// Enables automatic vacuum with the given thresholds.
    #[must_use]
    pub const fn auto_vacuum(mut self, thresholds: AutoVacuum) -> Self {
        self.auto_vacuum = Some(thresholds);
        self
    }

    pub(crate) fn sync_on_write(&self) -> bool {
        self.persistence == Persistence::Sync
    }

    pub(crate) fn needs_background(&self) -> bool {
        self.persistence == Persistence::Async || self.auto_vacuum.is_some()
    }
}
