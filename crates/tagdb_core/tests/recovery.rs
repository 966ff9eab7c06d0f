//! Crash recovery and durability tests.
//!
//! Every test drives a real `Database` through its public API and then
//! inspects the bytes it left behind, either in a temp file or in an
//! `InMemoryBackend` shared with the database.

use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tagdb_core::{
    Config, CoreError, Database, InMemoryBackend, LoadStrategy, QueryOptions, StorageBackend,
    StorageError, Tag, TagFilter, TagSet,
};
use tagdb_storage::StorageResult;
use tempfile::tempdir;

fn tags(list: Vec<Tag>) -> TagSet {
    TagSet::from_tags(list).unwrap()
}

/// Writes half of each append and then fails, while `fail` is set.
struct TornBackend {
    inner: InMemoryBackend,
    fail: Arc<AtomicBool>,
}

impl StorageBackend for TornBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.fail.load(Ordering::SeqCst) {
            let half = data.len() / 2;
            self.inner.append(&data[..half])?;
            return Err(StorageError::PartialWrite {
                written: half,
                expected: data.len(),
                source: io::Error::new(io::ErrorKind::Other, "no space left on device"),
            });
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        self.inner.rewrite(data)
    }
}

#[test]
fn committed_data_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.tdb");

    {
        let db = Database::open(&path).unwrap();
        db.write(|txn| {
            txn.insert("user:1", br#"{"name":"ada"}"#.to_vec(), tags(vec![Tag::int("age", 36)]))?;
            txn.insert("user:2", br#"{"name":"bob"}"#.to_vec(), tags(vec![Tag::int("age", 17)]))?;
            txn.insert("user:10", br#"{"name":"cy"}"#.to_vec(), TagSet::new())
        })
        .unwrap();
        db.tag("user:10", &[Tag::int("age", 52), Tag::float("score", 9.5)])
            .unwrap();
        db.remove("user:2").unwrap();
        db.close().unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.count(), 2);
    let adults = db
        .keys(&QueryOptions::new().tag(TagFilter::int_ge("age", 18)))
        .unwrap();
    let adults: Vec<&str> = adults.iter().map(|k| k.as_str()).collect();
    assert_eq!(adults, ["user:1", "user:10"]);
    assert_eq!(
        db.get("user:10").unwrap().tags().get_float("score"),
        Some(9.5)
    );
    db.verify_indices().unwrap();
}

#[test]
fn failed_transaction_leaves_file_byte_identical() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.tdb");
    let db = Database::open(&path).unwrap();
    db.insert("a", b"1".to_vec(), tags(vec![Tag::bool("flag", true)]))
        .unwrap();
    let before = fs::read(&path).unwrap();

    let err = db
        .write(|txn| {
            txn.insert("b", b"2".to_vec(), tags(vec![Tag::bool("flag", true)]))?;
            txn.remove("a")?;
            txn.insert("b", b"3".to_vec(), TagSet::new())
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::KeyAlreadyExists { .. }));

    assert_eq!(fs::read(&path).unwrap(), before);
    assert!(db.exists("a"));
    assert!(!db.exists("b"));
    let flagged = db
        .keys(&QueryOptions::new().tag(TagFilter::eq("flag", true)))
        .unwrap();
    assert_eq!(flagged.len(), 1);
    db.verify_indices().unwrap();
}

#[test]
fn partial_write_is_cut_back_and_rolled_back() {
    let inner = InMemoryBackend::new();
    let fail = Arc::new(AtomicBool::new(false));
    let backend = TornBackend {
        inner: inner.clone(),
        fail: Arc::clone(&fail),
    };
    let db = Database::open_with_backend(Box::new(backend), Config::default()).unwrap();
    db.insert("kept", b"ok".to_vec(), TagSet::new()).unwrap();
    let before = inner.data();

    fail.store(true, Ordering::SeqCst);
    let err = db
        .insert("lost", b"never".to_vec(), tags(vec![Tag::string("s", "x")]))
        .unwrap_err();
    assert!(matches!(err, CoreError::DbFileWriteFailed(_)));
    assert_eq!(inner.data(), before);
    assert!(!db.exists("lost"));
    assert_eq!(db.transaction_stats().rollbacks, 1);

    fail.store(false, Ordering::SeqCst);
    db.insert("lost", b"now".to_vec(), TagSet::new()).unwrap();
    drop(db);

    let db = Database::open_with_backend(Box::new(inner), Config::default()).unwrap();
    assert_eq!(db.count(), 2);
    assert_eq!(db.get("lost").unwrap().value(), b"now");
}

#[test]
fn torn_tail_from_a_crash_fails_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.tdb");
    {
        let db = Database::open(&path).unwrap();
        db.insert("a", b"value".to_vec(), TagSet::new()).unwrap();
    }
    let mut bytes = fs::read(&path).unwrap();
    let full = bytes.len();
    bytes.extend_from_slice(b"*3\r\n+set\r\n$1\r\nb\r\n$5\r\nva");
    fs::write(&path, &bytes).unwrap();

    let err = Database::open(&path).unwrap_err();
    assert!(matches!(err, CoreError::UnexpectedEof { .. }));

    // Cutting the torn tail off restores the last good state.
    bytes.truncate(full);
    fs::write(&path, &bytes).unwrap();
    let db = Database::open(&path).unwrap();
    assert_eq!(db.get("a").unwrap().value(), b"value");
}

#[test]
fn corrupt_bulk_length_fails_open_without_loading_values() {
    let mut bytes = Vec::new();
    {
        let backend = InMemoryBackend::new();
        let db = Database::open_with_backend(Box::new(backend.clone()), Config::default()).unwrap();
        db.insert("a", b"value".to_vec(), TagSet::new()).unwrap();
        drop(db);
        bytes.extend_from_slice(&backend.data());
    }
    let good = bytes.len();

    for length in [u64::MAX.to_string(), "4096".to_owned()] {
        bytes.truncate(good);
        bytes.extend_from_slice(format!("*3\r\n+set\r\n$1\r\nk\r\n${length}\r\nabc\r\n").as_bytes());
        for load in [LoadStrategy::Lazy, LoadStrategy::Buffered, LoadStrategy::Eager] {
            let backend = InMemoryBackend::with_data(bytes.clone());
            let config = Config::default().load_strategy(load);
            let err = Database::open_with_backend(Box::new(backend), config).unwrap_err();
            assert!(matches!(err, CoreError::UnexpectedEof { .. }), "{err}");
        }
    }
}

#[test]
fn lazy_and_buffered_loads_read_values_from_the_log() {
    for load in [LoadStrategy::Lazy, LoadStrategy::Buffered] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.tdb");
        {
            let db = Database::open(&path).unwrap();
            for i in 0..20 {
                db.insert(format!("doc:{i}"), format!("body-{i}").into_bytes(), TagSet::new())
                    .unwrap();
            }
        }

        let db = Database::open_with_config(&path, Config::default().load_strategy(load)).unwrap();
        for i in 0..20 {
            let doc = db.get(&format!("doc:{i}")).unwrap();
            assert_eq!(doc.value(), format!("body-{i}").as_bytes());
        }
        let docs = db.find(&QueryOptions::new().prefix("doc:*")).unwrap();
        assert_eq!(docs.len(), 20);
        assert_eq!(docs[2].key().as_str(), "doc:2");
        assert_eq!(db.cache_stats().is_some(), load == LoadStrategy::Buffered);
    }
}

#[test]
fn buffered_cache_evicts_least_recently_used_first() {
    let evicted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evicted);
    let config = Config::default()
        .load_strategy(LoadStrategy::Buffered)
        .cache(250, 1)
        .on_evict(move |_, value| {
            assert_eq!(value.len(), 100);
            counter.fetch_add(1, Ordering::SeqCst);
        });
    let db = Database::open_with_backend(Box::new(InMemoryBackend::new()), config).unwrap();

    db.insert("a", vec![b'a'; 100], TagSet::new()).unwrap();
    db.insert("b", vec![b'b'; 100], TagSet::new()).unwrap();
    db.get("a").unwrap();
    db.insert("c", vec![b'c'; 100], TagSet::new()).unwrap();

    assert_eq!(evicted.load(Ordering::SeqCst), 1);
    let stats = db.cache_stats().unwrap();
    assert_eq!(stats.items, 2);
    // "b" was evicted; "a" is still served from memory.
    let hits = stats.hits;
    db.get("a").unwrap();
    assert_eq!(db.cache_stats().unwrap().hits, hits + 1);
    assert_eq!(db.get("b").unwrap().value(), vec![b'b'; 100].as_slice());
}

#[test]
fn vacuum_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.tdb");
    {
        let db = Database::open_with_config(&path, Config::default().load_strategy(LoadStrategy::Lazy))
            .unwrap();
        for round in 0..10u8 {
            db.insert_or_replace("counter", vec![round], tags(vec![Tag::int("round", i64::from(round))]))
                .unwrap();
        }
        db.insert("other", b"x".to_vec(), TagSet::new()).unwrap();
        db.flush_all().unwrap();
        db.insert("fresh", b"y".to_vec(), tags(vec![Tag::bool("new", true)]))
            .unwrap();

        let size_before = fs::metadata(&path).unwrap().len();
        let reclaimed = db.vacuum().unwrap();
        let size_after = fs::metadata(&path).unwrap().len();
        assert_eq!(size_before - size_after, reclaimed);
        assert_eq!(db.get("fresh").unwrap().value(), b"y");
    }

    let db = Database::open(&path).unwrap();
    assert_eq!(db.count(), 1);
    assert!(db.get("fresh").unwrap().tags().get_bool("new").unwrap());
    let stats = db.stats().unwrap();
    assert_eq!(stats.dead_bytes, 0);
}

#[test]
fn replay_ignores_padding_between_records() {
    let backend = InMemoryBackend::new();
    {
        let db = Database::open_with_backend(Box::new(backend.clone()), Config::default()).unwrap();
        db.insert("a", b"1".to_vec(), TagSet::new()).unwrap();
    }
    let mut bytes = backend.data();
    bytes.extend_from_slice(&[0u8; 16]);
    let tail = InMemoryBackend::new();
    {
        let db = Database::open_with_backend(Box::new(tail.clone()), Config::default()).unwrap();
        db.insert("b", b"2".to_vec(), TagSet::new()).unwrap();
    }
    bytes.extend_from_slice(&tail.data());

    let db = Database::open_with_backend(Box::new(InMemoryBackend::with_data(bytes)), Config::default())
        .unwrap();
    assert_eq!(db.count(), 2);
    assert_eq!(db.get("b").unwrap().value(), b"2");
}
