//! Tests for the Database facade
//!
//! These tests verify:
//! - Values round-trip through compression unchanged
//! - The iterator yields stored (compressed) values
//! - Miss, byte and latency instrumentation
//! - Corruption-triggered recovery on open, and its failure modes
//! - Close semantics: flush, idempotence, logged failures, drop
//! - Sharing a handle across threads

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use lodestore::compression::{compress, decompress};
use lodestore::{Config, Database, DatabaseMetrics, Engine, LodeError, StorageBackend};
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (temp_dir, db)
}

fn setup_instrumented_db() -> (TempDir, Database, DatabaseMetrics) {
    let (temp_dir, db) = setup_temp_db();
    let metrics = DatabaseMetrics::new();
    let db = db.with_instruments(metrics.instruments());
    (temp_dir, db, metrics)
}

fn flip_byte(path: &Path, offset: usize) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset] ^= 0xFF;
    fs::write(path, bytes).unwrap();
}

// =============================================================================
// Mock Backend
// =============================================================================

/// In-memory backend whose behaviour is picked by the last component of
/// the configured location
struct MockBackend {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_writes: bool,
}

static RECOVER_CALLS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

impl MockBackend {
    fn new(fail_writes: bool) -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            fail_writes,
        }
    }

    fn mode(config: &Config) -> &str {
        config
            .data_dir
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
    }

    fn recovered(location: &Path) -> bool {
        RECOVER_CALLS.lock().unwrap().iter().any(|p| p == location)
    }
}

impl StorageBackend for MockBackend {
    type Iter = std::vec::IntoIter<lodestore::Result<(Vec<u8>, Vec<u8>)>>;

    fn open(config: &Config) -> lodestore::Result<Self> {
        match Self::mode(config) {
            "corrupt-recoverable" | "corrupt-unrecoverable" => {
                Err(LodeError::Corruption("table checksum mismatch".to_string()))
            }
            "unreadable" => Err(LodeError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "permission denied",
            ))),
            "failing-writes" => Ok(Self::new(true)),
            _ => Ok(Self::new(false)),
        }
    }

    fn recover(config: &Config) -> lodestore::Result<Self> {
        RECOVER_CALLS.lock().unwrap().push(config.data_dir.clone());
        match Self::mode(config) {
            "corrupt-unrecoverable" => Err(LodeError::Storage("repair failed".to_string())),
            _ => Ok(Self::new(false)),
        }
    }

    fn get(&self, key: &[u8]) -> lodestore::Result<Vec<u8>> {
        self.data
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(LodeError::KeyNotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> lodestore::Result<()> {
        if self.fail_writes {
            return Err(LodeError::Storage("disk full".to_string()));
        }
        self.data.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> lodestore::Result<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    fn iter(&self) -> Self::Iter {
        let entries: Vec<_> = self
            .data
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        entries.into_iter()
    }

    fn sync(&self) -> lodestore::Result<()> {
        if self.fail_writes {
            return Err(LodeError::Storage("fsync failed".to_string()));
        }
        Ok(())
    }

    fn close(self) -> lodestore::Result<()> {
        Ok(())
    }
}

fn open_mock(name: &str) -> lodestore::Result<Database<MockBackend>> {
    Database::<MockBackend>::open_backend(Config::at(Path::new("/mock").join(name)))
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_put_get_round_trip() {
    let (_temp, db) = setup_temp_db();

    db.put(b"key", b"value").unwrap();
    assert_eq!(db.get(b"key").unwrap(), b"value".to_vec());
}

#[test]
fn test_empty_value_round_trip() {
    let (_temp, db) = setup_temp_db();

    db.put(b"a", b"").unwrap();
    assert_eq!(db.get(b"a").unwrap(), Vec::<u8>::new());
}

#[test]
fn test_compressible_values_round_trip() {
    let (_temp, db) = setup_temp_db();
    let values: Vec<Vec<u8>> = vec![
        vec![0u8; 1000],
        vec![0xFE; 10],
        lodestore::compression::EMPTY_DIGEST.to_vec(),
        [vec![0u8; 31], vec![1]].concat(),
    ];

    for (i, value) in values.iter().enumerate() {
        db.put(&[i as u8], value).unwrap();
    }
    for (i, value) in values.iter().enumerate() {
        assert_eq!(&db.get(&[i as u8]).unwrap(), value);
    }
}

#[test]
fn test_values_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = Database::open(temp_dir.path()).unwrap();
        db.put(b"k", &[0, 0, 0, 7]).unwrap();
    }

    let db = Database::open(temp_dir.path()).unwrap();
    assert_eq!(db.get(b"k").unwrap(), vec![0, 0, 0, 7]);
}

#[test]
fn test_open_creates_missing_location() {
    let temp_dir = TempDir::new().unwrap();
    let location = temp_dir.path().join("nested/store");

    let db = Database::open(&location).unwrap();

    assert!(location.is_dir());
    assert_eq!(db.location(), location.as_path());
    assert!(!db.is_closed());
}

#[test]
fn test_get_reports_undecodable_value() {
    let (_temp, db, metrics) = setup_instrumented_db();

    // A lone token byte is not a valid stored value
    db.backend().unwrap().put(b"raw", &[0xFE]).unwrap();

    let err = db.get(b"raw").unwrap_err();
    assert!(matches!(err, LodeError::Decode(_)));
    assert!(!err.is_not_found());
    assert_eq!(metrics.misses.count(), 0);
}

// =============================================================================
// Iterator Tests
// =============================================================================

#[test]
fn test_iterator_yields_stored_values() {
    let (_temp, db) = setup_temp_db();
    let value = vec![1, 0, 0, 0, 0, 2];

    db.put(b"k", &value).unwrap();

    let entries: Vec<_> = db.new_iterator().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(entries.len(), 1);

    let (key, stored) = &entries[0];
    assert_eq!(key, b"k");
    assert_eq!(stored, &compress(&value));
    assert_ne!(stored, &value);
    assert_eq!(decompress(stored).unwrap(), value);
    assert_eq!(db.get(b"k").unwrap(), value);
}

#[test]
fn test_iterator_ascending_order_without_deleted_keys() {
    let (_temp, db) = setup_temp_db();

    for key in ["c", "a", "d", "b"] {
        db.put(key.as_bytes(), b"v").unwrap();
    }
    db.delete(b"c").unwrap();

    let keys: Vec<Vec<u8>> = db
        .new_iterator()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"d".to_vec()]);
}

// =============================================================================
// Instrumentation Tests
// =============================================================================

#[test]
fn test_miss_counting() {
    let (_temp, db, metrics) = setup_instrumented_db();

    assert!(db.get(b"never_written").unwrap_err().is_not_found());
    assert_eq!(metrics.misses.count(), 1);
    assert_eq!(metrics.bytes_read.count(), 0);

    db.put(b"k", b"v").unwrap();
    db.delete(b"k").unwrap();
    assert!(db.get(b"k").unwrap_err().is_not_found());

    assert_eq!(metrics.misses.count(), 2);
    assert_eq!(metrics.bytes_read.count(), 0);
    assert_eq!(metrics.get_timer.count(), 2);
}

#[test]
fn test_byte_meters_count_stored_length() {
    let (_temp, db, metrics) = setup_instrumented_db();
    let value = vec![0u8; 32];

    db.put(b"k", &value).unwrap();
    assert_eq!(metrics.bytes_written.count(), compress(&value).len() as u64);
    assert_eq!(metrics.bytes_written.count(), 2);

    db.get(b"k").unwrap();
    assert_eq!(metrics.bytes_read.count(), 2);
}

#[test]
fn test_timers_record_one_sample_per_call() {
    let (_temp, db, metrics) = setup_instrumented_db();

    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();
    db.get(b"a").unwrap();
    db.delete(b"a").unwrap();
    db.delete(b"missing").unwrap();

    assert_eq!(metrics.put_timer.count(), 2);
    assert_eq!(metrics.get_timer.count(), 1);
    assert_eq!(metrics.delete_timer.count(), 2);
    assert!(metrics.put_timer.max() <= metrics.put_timer.total());
}

#[test]
fn test_put_timer_records_failed_puts() {
    let metrics = DatabaseMetrics::new();
    let db = open_mock("failing-writes")
        .unwrap()
        .with_instruments(metrics.instruments());

    for _ in 0..3 {
        assert!(matches!(db.put(b"k", b"v"), Err(LodeError::Storage(_))));
    }

    assert_eq!(metrics.put_timer.count(), 3);
}

#[test]
fn test_uninstrumented_handle_works() {
    let (_temp, db) = setup_temp_db();

    db.put(b"k", b"v").unwrap();
    assert!(db.get(b"missing").is_err());
    assert!(format!("{:?}", db.instruments()).contains("put_timer: false"));
}

// =============================================================================
// Open / Recovery Tests
// =============================================================================

#[test]
fn test_open_recovers_corrupted_store() {
    let temp_dir = TempDir::new().unwrap();
    {
        let db = Database::open(temp_dir.path()).unwrap();
        db.put(b"key", b"value").unwrap();
    }

    // Inside the stored value of the only table entry
    flip_byte(&temp_dir.path().join("sstables/sstable_000001.sst"), 14 + 8 + 3);

    let err = Engine::open(Config::at(temp_dir.path())).err().unwrap();
    assert!(err.is_corruption());

    let db = Database::open(temp_dir.path()).unwrap();
    db.put(b"fresh", b"data").unwrap();
    assert_eq!(db.get(b"fresh").unwrap(), b"data".to_vec());
    assert!(temp_dir.path().join("lost/sstable_000001.sst").exists());
}

#[test]
fn test_open_recovers_wal_with_damaged_length() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(lodestore::WalSyncStrategy::EveryWrite)
        .build();
    {
        let db = Database::open_with_config(config.clone()).unwrap();
        for i in 0..5 {
            db.put(format!("key{}", i).as_bytes(), b"value").unwrap();
        }
        // Crash: the writes only live in the WAL
        std::mem::forget(db);
    }

    let wal_path = temp_dir.path().join("wal.log");
    let frame_len = fs::metadata(&wal_path).unwrap().len() as usize / 5;
    let mut bytes = fs::read(&wal_path).unwrap();
    bytes[frame_len + 12..frame_len + 16].copy_from_slice(&u32::MAX.to_le_bytes());
    fs::write(&wal_path, bytes).unwrap();

    let db = Database::open_with_config(config).unwrap();
    assert!(db.get(b"key1").unwrap_err().is_not_found());
    for key in ["key0", "key2", "key3", "key4"] {
        assert_eq!(db.get(key.as_bytes()).unwrap(), b"value".to_vec());
    }
}

#[test]
fn test_open_uses_recovered_backend() {
    let db = open_mock("corrupt-recoverable").unwrap();

    assert!(MockBackend::recovered(db.location()));
    db.put(b"k", b"v").unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"v".to_vec());
}

#[test]
fn test_open_fails_when_recovery_fails() {
    let err = open_mock("corrupt-unrecoverable").unwrap_err();

    assert!(matches!(err, LodeError::Storage(ref msg) if msg == "repair failed"));
}

#[test]
fn test_open_does_not_recover_other_errors() {
    let err = open_mock("unreadable").unwrap_err();

    assert!(matches!(err, LodeError::Io(_)));
    assert!(!MockBackend::recovered(Path::new("/mock/unreadable")));
}

// =============================================================================
// Close Tests
// =============================================================================

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_double_close_is_a_noop() {
    let (_temp, mut db) = setup_temp_db();
    db.put(b"k", b"v").unwrap();

    db.close();
    db.close();

    assert!(db.is_closed());
    assert!(db.backend().is_none());
}

#[test]
fn test_operations_after_close_fail() {
    let (_temp, mut db) = setup_temp_db();
    db.close();

    assert!(matches!(db.put(b"k", b"v"), Err(LodeError::Closed)));
    assert!(matches!(db.get(b"k"), Err(LodeError::Closed)));
    assert!(matches!(db.delete(b"k"), Err(LodeError::Closed)));
    assert!(matches!(db.flush(), Err(LodeError::Closed)));
    assert!(matches!(db.new_iterator(), Err(LodeError::Closed)));
}

#[test]
fn test_closed_get_is_not_a_miss() {
    let (_temp, mut db, metrics) = setup_instrumented_db();
    db.close();

    assert!(db.get(b"k").is_err());
    assert_eq!(metrics.misses.count(), 0);
}

#[test]
fn test_close_persists_writes() {
    let temp_dir = TempDir::new().unwrap();
    {
        let mut db = Database::open(temp_dir.path()).unwrap();
        db.put(b"k", b"v").unwrap();
        db.flush().unwrap();
        db.close();
    }

    let engine = Engine::open(Config::at(temp_dir.path())).unwrap();
    assert_eq!(engine.wal_recovery().entries_recovered, 0);
    assert_eq!(engine.get(b"k").unwrap(), compress(b"v"));
}

#[test]
fn test_close_time_flush_failure_is_only_logged() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut db = open_mock("failing-writes").unwrap();
        db.close();
        assert!(db.is_closed());
    });

    let output = logs.contents();
    assert!(output.contains("failed to flush database"), "logs: {}", output);
    assert!(output.contains("fsync failed"), "logs: {}", output);
    assert!(output.contains("flushed and closed database"), "logs: {}", output);
}

// =============================================================================
// Scenario Tests
// =============================================================================

#[test]
fn test_put_get_delete_scenario() {
    let (_temp, db, metrics) = setup_instrumented_db();

    db.put(b"a", b"").unwrap();
    assert_eq!(db.get(b"a").unwrap(), Vec::<u8>::new());

    db.put(b"x", b"hello").unwrap();
    db.delete(b"x").unwrap();
    assert!(matches!(db.get(b"x"), Err(LodeError::KeyNotFound)));

    assert_eq!(metrics.misses.count(), 1);
}

#[test]
fn test_delete_is_idempotent() {
    let (_temp, db) = setup_temp_db();

    db.delete(b"ghost").unwrap();
    db.put(b"k", b"v").unwrap();
    db.delete(b"k").unwrap();
    db.delete(b"k").unwrap();

    assert!(db.get(b"k").unwrap_err().is_not_found());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_shared_handle_across_threads() {
    let (_temp, db, metrics) = setup_instrumented_db();
    let db = Arc::new(db);

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("t{}_{}", t, i);
                    let value = vec![0u8; i];
                    db.put(key.as_bytes(), &value).unwrap();
                    assert_eq!(db.get(key.as_bytes()).unwrap(), value);
                }
            })
        })
        .collect();

    for handle in workers {
        handle.join().unwrap();
    }

    assert_eq!(metrics.put_timer.count(), 100);
    assert_eq!(metrics.get_timer.count(), 100);
    assert_eq!(db.new_iterator().unwrap().count(), 100);
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_facade_round_trip(
        entries in prop::collection::btree_map(
            prop::collection::vec(any::<u8>(), 0..16),
            prop::collection::vec(prop_oneof![Just(0u8), Just(0xFEu8), any::<u8>()], 0..256),
            0..16,
        )
    ) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(temp_dir.path()).unwrap();

        for (key, value) in &entries {
            db.put(key, value).unwrap();
        }
        for (key, value) in &entries {
            prop_assert_eq!(&db.get(key).unwrap(), value);
        }
    }
}
