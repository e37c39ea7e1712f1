//! Storage Manager
//!
//! Manages multiple SSTables and coordinates reads/writes.
//!
//! ## Responsibilities
//! - Discover and verify existing SSTables on startup
//! - Search SSTables newest → oldest for reads
//! - Create new SSTables from MemTable flushes
//! - Bound open table files through the table cache

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::error::Result;
use crate::memtable::{MemTable, MemTableEntry};
use crate::LodeError;

use super::sstable::TEMP_EXTENSION;
use super::{SSTable, SSTableBuilder, SSTableIterator, SSTableReader, TableCache};

/// Manages the storage layer
///
/// ## Concurrency:
/// - `sstables`: Protected by RwLock (many concurrent readers, exclusive writer)
/// - `cache`: serializes access to open file handles
/// - `next_sstable_id`: Atomic counter (lock-free)
/// - All methods use `&self` (no exclusive access needed)
pub struct StorageManager {
    /// Directory where SSTables are stored
    data_dir: PathBuf,

    /// Verified SSTable readers, ordered newest → oldest
    sstables: RwLock<Vec<SSTableReader>>,

    /// Open file handles, bounded by the open-file limit; shared with scans
    cache: Arc<TableCache>,

    /// Next ID for creating new SSTables (atomic, lock-free)
    next_sstable_id: AtomicU64,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove leftovers of interrupted flushes
    /// 3. Open and verify every SSTable (loads indexes into RAM)
    /// 4. Order by ID descending (newest first)
    ///
    /// A damaged table fails the whole open with `LodeError::Corruption`.
    pub fn open(path: &Path, open_file_limit: usize) -> Result<Self> {
        fs::create_dir_all(path)?;

        remove_temp_tables(path)?;
        let mut sstable_ids = Self::list_sstable_ids(path)?;

        // Newest first (highest ID first)
        sstable_ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut sstables = Vec::with_capacity(sstable_ids.len());
        for &id in &sstable_ids {
            let sstable_path = Self::sstable_path_with_dir(path, id);
            let reader = SSTableReader::open(&sstable_path, id).map_err(|e| {
                error!(path = %sstable_path.display(), error = %e, "failed to open sstable");
                e
            })?;
            sstables.push(reader);
        }

        // Next ID = max + 1, or 1 if no SSTables exist
        let next_id = sstable_ids.first().map(|&id| id + 1).unwrap_or(1);

        debug!(dir = %path.display(), tables = sstables.len(), "storage opened");

        Ok(Self {
            data_dir: path.to_path_buf(),
            sstables: RwLock::new(sstables),
            cache: Arc::new(TableCache::new(open_file_limit)),
            next_sstable_id: AtomicU64::new(next_id),
        })
    }

    /// Get a value by key (searches all SSTables newest → oldest)
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key not found, or found tombstone (deleted)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let sstables = self.sstables.read();

        for reader in sstables.iter() {
            // Skip SSTable if key is outside its range (O(1) check)
            if !reader.might_contain(key) {
                continue;
            }

            let found = self
                .cache
                .with_file(reader.id(), reader.path(), |file| reader.get(key, file));

            match found {
                Ok(Some(value)) => return Ok(Some(value)), // Found!
                Ok(None) => return Ok(None),               // Tombstone = deleted
                Err(LodeError::KeyNotFound) => continue,   // Not in this SSTable
                Err(e) => return Err(e),                   // Real error
            }
        }

        Ok(None)
    }

    /// Flush a MemTable to a new SSTable
    ///
    /// Creates a new SSTable file from the MemTable's sorted entries,
    /// opens a reader for it, and adds it to the front of the list.
    pub fn flush(&self, memtable: &MemTable) -> Result<SSTable> {
        if memtable.is_empty() {
            return Err(LodeError::Storage(
                "Cannot flush empty MemTable".to_string(),
            ));
        }

        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);

        // Entries arrive sorted from the BTreeMap snapshot
        let mut builder = SSTableBuilder::new(&path)?;
        for (key, entry) in memtable.iter() {
            match entry {
                MemTableEntry::Value(v) => builder.add(&key, &v)?,
                MemTableEntry::Tombstone => builder.add_tombstone(&key)?,
            }
        }
        let metadata = builder.finish()?;

        let reader = SSTableReader::open(&path, id)?;

        let mut sstables = self.sstables.write();
        sstables.insert(0, reader);

        debug!(
            path = %path.display(),
            entries = metadata.entry_count,
            bytes = metadata.file_size,
            "memtable flushed to sstable"
        );

        Ok(metadata)
    }

    /// Scans over every table, newest first, for merged iteration
    ///
    /// Scans read through the table cache and count against the open-file
    /// limit like point lookups do.
    pub fn scans(&self) -> Vec<SSTableIterator> {
        self.sstables
            .read()
            .iter()
            .map(|r| r.iter_cached(Arc::clone(&self.cache)))
            .collect()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    /// Total entries across all SSTables (tombstones and shadowed versions included)
    pub fn total_entries(&self) -> u64 {
        self.sstables.read().iter().map(|r| r.entry_count()).sum()
    }

    /// Number of table files currently held open
    pub fn open_files(&self) -> usize {
        self.cache.open_files()
    }

    /// Maximum number of table files held open
    pub fn open_file_limit(&self) -> usize {
        self.cache.capacity()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next SSTable ID (for testing/debugging)
    pub fn next_sstable_id(&self) -> u64 {
        self.next_sstable_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Path Helpers
    // =========================================================================

    /// Generate the file path for an SSTable with given ID
    fn sstable_path(&self, id: u64) -> PathBuf {
        Self::sstable_path_with_dir(&self.data_dir, id)
    }

    /// Generate SSTable path given a directory and ID
    pub(crate) fn sstable_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("sstable_{:06}.sst", id))
    }

    /// IDs of all SSTable files in `dir`, unordered
    pub(crate) fn list_sstable_ids(dir: &Path) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let file_path = entry?.path();
            if file_path.is_file() {
                if let Some(id) = Self::parse_sstable_id(&file_path) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Parse SSTable ID from filename
    /// "sstable_000042.sst" → Some(42)
    fn parse_sstable_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix("sstable_")?;
        id_str.parse().ok()
    }
}

/// Delete tables a crashed flush left under their temporary name
fn remove_temp_tables(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
            debug!(path = %path.display(), "removing unfinished sstable");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
