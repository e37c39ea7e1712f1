//! Tests for the open-file budget, measured by the process's descriptors
//!
//! Kept in its own test binary: descriptor counts are process-wide, and
//! tests running in parallel would disturb them.

#![cfg(target_os = "linux")]

use std::fs;

use lodestore::config::{Config, WalSyncStrategy};
use lodestore::engine::Engine;
use tempfile::TempDir;

fn open_descriptors() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

#[test]
fn test_scan_descriptors_stay_within_limit() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .open_file_limit(1)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..20 {
        engine.put(format!("k{:02}", i).as_bytes(), b"v").unwrap();
        engine.flush().unwrap();
    }
    assert_eq!(engine.sstable_count(), 20);

    let before = open_descriptors();

    // The first merged entry pulls one entry from every table
    let mut scans: Vec<_> = (0..3).map(|_| engine.iter()).collect();
    for scan in scans.iter_mut() {
        assert!(scan.next().unwrap().is_ok());
    }
    let during = open_descriptors();

    assert!(
        during <= before + 1,
        "scans opened {} descriptors with a limit of 1",
        during.saturating_sub(before)
    );
    assert!(engine.open_table_files() <= 1);

    for scan in scans {
        assert_eq!(scan.count(), 19);
    }
}
