//! Configuration for lodestore
//!
//! Centralized configuration with sensible defaults.
//!
//! The open-file budget has a process-wide default that can be overridden
//! before handles are opened. It is copied into each `Config` when the config
//! is built and read once by `Engine::open`; changing the default later never
//! reaches a handle that is already open.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{LodeError, Result};

/// Built-in default for the number of table files kept open at once
pub const DEFAULT_OPEN_FILE_LIMIT: usize = 64;

static OPEN_FILE_LIMIT: AtomicUsize = AtomicUsize::new(DEFAULT_OPEN_FILE_LIMIT);

/// Current process-wide default open-file budget
pub fn default_open_file_limit() -> usize {
    OPEN_FILE_LIMIT.load(Ordering::Relaxed)
}

/// Override the process-wide default open-file budget.
///
/// Only configs built after this call pick up the new value.
pub fn set_default_open_file_limit(limit: usize) {
    OPEN_FILE_LIMIT.store(limit, Ordering::Relaxed);
}

/// Main configuration for a lodestore location
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (WAL, SSTables, etc.)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log          (write-ahead log)
    ///     ├── sstables/        (SSTable files)
    ///     └── lost/            (files quarantined by repair)
    pub data_dir: PathBuf,

    /// Maximum number of SSTable file handles cached open at once
    pub open_file_limit: usize,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./lodestore_data"),
            open_file_limit: default_open_file_limit(),
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            memtable_size_limit: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Default config rooted at `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::builder().data_dir(path).build()
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.open_file_limit == 0 {
            return Err(LodeError::Config(
                "open_file_limit must be at least 1".to_string(),
            ));
        }
        if self.memtable_size_limit == 0 {
            return Err(LodeError::Config(
                "memtable_size_limit must be at least 1 byte".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(LodeError::Config(
                "wal sync interval must be at least 1 entry".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the maximum number of cached open table files
    pub fn open_file_limit(mut self, limit: usize) -> Self {
        self.config.open_file_limit = limit;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
