//! Transaction manager.

use crate::cache::ValueCache;
use crate::engine::Engine;
use crate::error::CoreResult;
use crate::transaction::{ReadTransaction, WriteTransaction};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Counters describing transaction outcomes since open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Read transactions run.
    pub reads: u64,
    /// Write transactions committed.
    pub commits: u64,
    /// Write transactions rolled back by a callback error or a log failure.
    pub rollbacks: u64,
}

/// Runs read and write transactions against one engine.
///
/// ## Single-Writer Guarantee
///
/// The engine sits behind one reader-writer lock. Readers share it; a writer
/// holds it exclusively for the whole callback, commit included, so write
/// transactions are totally ordered and readers only ever see committed
/// state.
///
/// Value cache evictions caused inside a transaction are reported to the
/// eviction callback after the lock is released, so the callback may itself
/// open transactions.
pub struct TransactionManager {
    engine: RwLock<Engine>,
    cache: Option<Arc<ValueCache>>,
    reads: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl TransactionManager {
    /// Creates a manager owning `engine`.
    pub fn new(engine: Engine) -> Self {
        Self {
            cache: engine.cache().cloned(),
            engine: RwLock::new(engine),
            reads: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// Runs `f` in a read transaction holding the shared lock.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn read<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadTransaction<'_>) -> CoreResult<T>,
    {
        let result = {
            let engine = self.engine.read();
            self.reads.fetch_add(1, Ordering::Relaxed);
            f(&ReadTransaction::new(&engine))
        };
        self.deliver_evictions();
        result
    }

    /// Runs `f` in a write transaction holding the exclusive lock.
    ///
    /// On `Ok` the transaction's commands are logged as one append. On
    /// `Err`, or if the append fails, every mutation is undone before the
    /// lock is released and nothing reaches the log.
    ///
    /// # Errors
    ///
    /// Returns the callback's error, a log write error, or
    /// [`CoreError::InvariantViolated`](crate::CoreError::InvariantViolated)
    /// if rollback itself fails.
    pub fn write<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<T>,
    {
        let result = self.write_locked(f);
        self.deliver_evictions();
        result
    }

    fn write_locked<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> CoreResult<T>,
    {
        let mut engine = self.engine.write();
        let mut txn = WriteTransaction::new(&mut engine);
        match f(&mut txn) {
            Ok(value) => match txn.commit() {
                Ok(()) => {
                    self.commits.fetch_add(1, Ordering::Relaxed);
                    Ok(value)
                }
                Err(err) => {
                    self.rollbacks.fetch_add(1, Ordering::Relaxed);
                    Err(err)
                }
            },
            Err(err) => {
                self.rollbacks.fetch_add(1, Ordering::Relaxed);
                debug!(error = %err, "write transaction rolled back");
                if let Err(rollback) = txn.roll_back() {
                    error!(error = %rollback, cause = %err, "rollback failed");
                    return Err(rollback);
                }
                Err(err)
            }
        }
    }

    /// Returns outcome counters.
    ///
    /// Panicking write callbacks are rolled back but not counted.
    #[must_use]
    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            reads: self.reads.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Reports queued cache evictions. Must not be called with the engine
    /// lock held.
    pub(crate) fn deliver_evictions(&self) {
        if let Some(cache) = &self.cache {
            cache.deliver_evictions();
        }
    }

    pub(crate) fn engine(&self) -> RwLockReadGuard<'_, Engine> {
        self.engine.read()
    }

    pub(crate) fn engine_mut(&self) -> RwLockWriteGuard<'_, Engine> {
        self.engine.write()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadStrategy;
    use crate::entity::{Tag, TagSet};
    use crate::error::CoreError;
    use crate::key::PrimaryKey;
    use crate::query::{QueryOptions, TagFilter};
    use crate::wal::CommandLog;
    use std::sync::Arc;
    use tagdb_storage::InMemoryBackend;

    fn manager() -> TransactionManager {
        TransactionManager::new(Engine::new(None, None, LoadStrategy::Eager))
    }

    fn logged() -> (TransactionManager, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let log = CommandLog::new(Box::new(backend.clone()), true);
        let engine = Engine::new(Some(Arc::new(log)), None, LoadStrategy::Lazy);
        (TransactionManager::new(engine), backend)
    }

    fn tags(list: Vec<Tag>) -> TagSet {
        TagSet::from_tags(list).unwrap()
    }

    #[test]
    fn committed_writes_are_visible_to_readers() {
        let tm = manager();
        tm.write(|txn| {
            txn.insert("user:1", b"a".to_vec(), tags(vec![Tag::bool("admin", true)]))?;
            txn.insert("user:2", b"b".to_vec(), TagSet::new())
        })
        .unwrap();

        let found = tm
            .read(|txn| txn.find(&QueryOptions::new().tag(TagFilter::eq("admin", true))))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value(), b"a");
        assert_eq!(tm.stats().commits, 1);
    }

    #[test]
    fn callback_error_undoes_everything() {
        let tm = manager();
        tm.write(|txn| txn.insert("keep", b"1".to_vec(), tags(vec![Tag::int("n", 1)])))
            .unwrap();

        let err = tm
            .write(|txn| {
                txn.insert("new", b"x".to_vec(), tags(vec![Tag::int("n", 2)]))?;
                txn.insert_or_replace("keep", b"2".to_vec(), TagSet::new())?;
                txn.tag("new", &[Tag::string("s", "v")])?;
                txn.untag("new", &["n"])?;
                txn.remove("keep")?;
                txn.flush_all();
                txn.insert("after", b"y".to_vec(), TagSet::new())?;
                txn.get("missing").map(|_| ())
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::DocumentNotFound { .. }));

        tm.read(|txn| {
            assert_eq!(txn.count(), 1);
            assert!(!txn.exists("new"));
            assert!(!txn.exists("after"));
            let keep = txn.get("keep")?;
            assert_eq!(keep.value(), b"1");
            assert_eq!(keep.tags().get_int("n"), Some(1));
            Ok(())
        })
        .unwrap();
        tm.engine().check_consistency().unwrap();
        assert_eq!(tm.stats().rollbacks, 1);
    }

    #[test]
    fn writes_are_visible_inside_the_transaction() {
        let tm = manager();
        tm.write(|txn| {
            txn.insert("a", b"1".to_vec(), TagSet::new())?;
            txn.insert("b:1", b"2".to_vec(), TagSet::new())?;
            assert!(txn.exists("a"));
            assert_eq!(txn.count(), 2);
            assert_eq!(txn.pending_commands(), 2);
            let prefixed = txn.keys(&QueryOptions::new().prefix("b:*"))?;
            assert_eq!(prefixed, [PrimaryKey::from("b:1")]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn panic_in_callback_rolls_back() {
        let tm = manager();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = tm.write(|txn| -> CoreResult<()> {
                txn.insert("a", b"1".to_vec(), TagSet::new())?;
                panic!("boom");
            });
        }));
        assert!(result.is_err());
        assert_eq!(tm.read(|txn| Ok(txn.count())).unwrap(), 0);
    }

    #[test]
    fn failed_transaction_logs_nothing() {
        let (tm, backend) = logged();
        tm.write(|txn| txn.insert("a", b"1".to_vec(), TagSet::new()))
            .unwrap();
        let before = backend.data();

        let _ = tm.write(|txn| {
            txn.insert("b", b"2".to_vec(), TagSet::new())?;
            txn.insert("a", b"dup".to_vec(), TagSet::new())
        });
        assert_eq!(backend.data(), before);
    }

    #[test]
    fn commands_are_logged_in_call_order() {
        let (tm, backend) = logged();
        tm.write(|txn| {
            txn.insert("a", b"1".to_vec(), TagSet::new())?;
            txn.remove("a")?;
            txn.insert("b", b"2".to_vec(), TagSet::new())
        })
        .unwrap();

        let text = String::from_utf8(backend.data()).unwrap();
        let set_a = text.find("+set").unwrap();
        let del = text.find("+del").unwrap();
        let set_b = text.rfind("+set").unwrap();
        assert!(set_a < del && del < set_b);
    }

    #[test]
    fn lazy_values_are_read_back_from_the_log() {
        let (tm, _backend) = logged();
        tm.write(|txn| txn.insert("k", b"payload".to_vec(), TagSet::new()))
            .unwrap();

        let engine = tm.engine();
        let entry = engine.primary().get(&"k".into()).unwrap();
        assert!(entry.resident_value().is_none());
        assert!(entry.is_committed());
        drop(engine);

        let doc = tm.read(|txn| txn.get("k")).unwrap();
        assert_eq!(doc.value(), b"payload");
    }
}
