//! Engine Module
//!
//! The embedded storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and Storage
//! - Handle concurrent read/write access
//! - Trigger flushes when MemTable is full
//! - Classify damaged on-disk state as corruption on open
//! - Repair damaged state on request

mod iterator;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

pub use iterator::EngineIterator;

use crate::config::Config;
use crate::error::{LodeError, Result};
use crate::memtable::MemTable;
use crate::storage::{repair_tables, StorageManager, TableRepair};
use crate::wal::{Operation, RecoveryResult, WalRecovery, WalWriter};

/// How the WAL is treated while opening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalMode {
    /// Damaged entries fail the open
    Strict,
    /// Damaged entries are skipped
    Salvage,
}

/// What a repair pass found and fixed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub tables: TableRepair,
    pub wal: RecoveryResult,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/flush): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Must acquire: write_lock → WAL → memtable → storage (write)
///
/// - **Reads** (get): Concurrent
///   - No write_lock needed
///   - MemTable and the SSTable list use internal RwLocks
///   - Table file handles are shared through the table cache
///
/// - **Iterators**: capture the memtable and the table list under
///   `write_lock`, then read without it
pub struct Engine {
    /// Engine configuration (captured at open)
    config: Config,

    /// Directory for all data files (SSTables)
    storage_dir: PathBuf,

    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// In-memory table for recent writes (internal RwLock)
    memtable: MemTable,

    /// Persistent storage manager (internal RwLock on sstables vec)
    storage: StorageManager,

    /// Serializes write operations (put/delete/flush)
    write_lock: Mutex<()>,

    /// What replaying the WAL found at open
    wal_recovery: RecoveryResult,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const SSTABLE_DIR: &'static str = "sstables";
    const LOST_DIR: &'static str = "lost";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Open and verify existing SSTables
    /// 3. Verify the WAL, then replay it and persist the replayed entries
    /// 4. Ready to serve requests
    ///
    /// A damaged table or a damaged WAL entry (other than a torn final
    /// entry) fails with an error for which `is_corruption()` holds.
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with(config, WalMode::Strict)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::at(path))
    }

    /// Repair the store at `config.data_dir`, then open it
    pub fn recover(config: Config) -> Result<Self> {
        let tables = Self::repair_tables(&config)?;
        let engine = Self::open_with(config, WalMode::Salvage)?;

        let report = RepairReport {
            tables,
            wal: engine.wal_recovery.clone(),
        };
        info!(
            path = %engine.data_dir().display(),
            tables_checked = report.tables.tables_checked,
            tables_rebuilt = report.tables.tables_rebuilt,
            entries_salvaged = report.tables.entries_salvaged,
            wal_recovered = report.wal.entries_recovered,
            wal_corrupted = report.wal.entries_corrupted,
            "store recovered"
        );
        Ok(engine)
    }

    /// Repair the store at `config.data_dir` without keeping it open
    pub fn repair(config: Config) -> Result<RepairReport> {
        let tables = Self::repair_tables(&config)?;
        let engine = Self::open_with(config, WalMode::Salvage)?;
        let wal = engine.wal_recovery.clone();
        engine.close()?;
        Ok(RepairReport { tables, wal })
    }

    fn repair_tables(config: &Config) -> Result<TableRepair> {
        config.validate()?;
        let storage_dir = config.data_dir.join(Self::SSTABLE_DIR);
        let lost_dir = config.data_dir.join(Self::LOST_DIR);
        repair_tables(&storage_dir, &lost_dir)
    }

    fn open_with(config: Config, mode: WalMode) -> Result<Self> {
        config.validate()?;

        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;

        // Step 2: Compute paths (derived from data_dir, not configurable)
        let storage_dir = config.data_dir.join(Self::SSTABLE_DIR);
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);

        // Step 3: Open storage manager (verifies existing SSTables)
        let storage = StorageManager::open(&storage_dir, config.open_file_limit)?;

        // Step 4: Create memtable
        let memtable = MemTable::new();

        // Step 5: Replay the WAL, if any, and make the replayed data durable
        let wal_recovery = if wal_path.exists() {
            if mode == WalMode::Strict {
                let report = WalRecovery::verify(&wal_path)?;
                if report.entries_corrupted > 0 {
                    return Err(LodeError::WalCorruption(format!(
                        "{}: {} damaged entries",
                        wal_path.display(),
                        report.entries_corrupted
                    )));
                }
            }

            let (entries, result) = WalRecovery::recover(&wal_path)?;

            if result.entries_recovered > 0 || result.entries_corrupted > 0 || result.was_truncated {
                info!(
                    path = %wal_path.display(),
                    recovered = result.entries_recovered,
                    corrupted = result.entries_corrupted,
                    truncated = result.was_truncated,
                    last_lsn = result.last_lsn,
                    "WAL replayed"
                );
            }

            for entry in entries {
                match entry.operation {
                    Operation::Put { key, value } => {
                        memtable.put(key, value);
                    }
                    Operation::Delete { key } => {
                        memtable.delete(key);
                    }
                }
            }

            // Persist what was replayed before the WAL is reset
            if !memtable.is_empty() {
                debug!(entries = memtable.entry_count(), "flushing replayed entries");
                storage.flush(&memtable)?;
                memtable.clear();
            }

            result
        } else {
            RecoveryResult::default()
        };

        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;
        if wal_recovery.entries_recovered > 0 {
            wal.truncate()?;
        }

        debug!(
            path = %config.data_dir.display(),
            tables = storage.sstable_count(),
            open_file_limit = config.open_file_limit,
            "engine opened"
        );

        Ok(Self {
            config,
            storage_dir,
            wal: Mutex::new(wal),
            memtable,
            storage,
            write_lock: Mutex::new(()),
            wal_recovery,
        })
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. MemTable (most recent writes)
    /// 2. SSTables (newest to oldest)
    ///
    /// An absent or deleted key is `LodeError::KeyNotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.lookup(key)?.ok_or(LodeError::KeyNotFound)
    }

    /// Like `get`, with absence as `Ok(None)`
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.memtable.get(key) {
            return Ok(entry.into_value());
        }
        self.storage.get(key)
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Write to WAL (durability)
    /// 3. Write to MemTable
    /// 4. Check if flush needed
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    /// Delete a key
    ///
    /// Writes a tombstone even when the key is absent, so deleting is
    /// idempotent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(Operation::Delete { key: key.to_vec() })
    }

    fn write(&self, operation: Operation) -> Result<()> {
        let _write_guard = self.write_lock.lock().map_err(|e| {
            LodeError::LockPoisoned(format!("Write lock poisoned: {}", e))
        })?;

        // Step 1: WAL first (durability guarantee)
        self.lock_wal()?.append(operation.clone())?;

        // Step 2: MemTable
        let new_size = match operation {
            Operation::Put { key, value } => self.memtable.put(key, value),
            Operation::Delete { key } => self.memtable.delete(key),
        };

        // Step 3: Flush if the memtable outgrew its budget
        if new_size >= self.config.memtable_size_limit {
            self.flush_internal()?;
        }

        Ok(())
    }

    /// Ascending iterator over all live pairs, as of this call
    ///
    /// Both sources are captured under the write lock, so no flush can land
    /// between the memtable snapshot and the table list.
    pub fn iter(&self) -> EngineIterator {
        // The lock guards no data; a poisoned one is still a valid barrier
        let _write_guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let memtable = self.memtable.iter();
        EngineIterator::new(memtable, self.storage.scans())
    }

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock().map_err(|e| {
            LodeError::LockPoisoned(format!("Write lock poisoned: {}", e))
        })?;

        self.flush_internal()
    }

    /// Internal flush implementation (called with write lock held)
    fn flush_internal(&self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        // Step 1: Flush memtable to SSTable
        self.storage.flush(&self.memtable)?;

        // Step 2: Clear memtable
        self.memtable.clear();

        // Step 3: Truncate WAL (entries are now durable in SSTable)
        self.lock_wal()?.truncate()?;

        Ok(())
    }

    /// fsync the WAL so every acknowledged write survives a crash
    pub fn sync(&self) -> Result<()> {
        self.lock_wal()?.sync()
    }

    /// Close the engine gracefully
    ///
    /// Flushes any pending data and syncs to disk
    pub fn close(self) -> Result<()> {
        if !self.memtable.is_empty() {
            self.flush()?;
        }

        self.sync()?;
        debug!(path = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    fn lock_wal(&self) -> Result<std::sync::MutexGuard<'_, WalWriter>> {
        self.wal.lock().map_err(|e| {
            warn!("WAL lock poisoned");
            LodeError::LockPoisoned(format!("WAL lock poisoned: {}", e))
        })
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the storage directory path (where SSTables are stored)
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.storage.sstable_count()
    }

    /// Entries stored across all SSTables, shadowed versions included
    pub fn sstable_entry_count(&self) -> u64 {
        self.storage.total_entries()
    }

    /// Number of table files currently open
    pub fn open_table_files(&self) -> usize {
        self.storage.open_files()
    }

    /// What replaying the WAL found when this engine was opened
    pub fn wal_recovery(&self) -> &RecoveryResult {
        &self.wal_recovery
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

