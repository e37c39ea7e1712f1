//! Table Cache
//!
//! Bounded set of open SSTable file handles.
//!
//! Table indexes stay in memory for the lifetime of the store, but file
//! descriptors are a scarcer resource: at most `capacity` table files are open
//! at any time, and the least recently used handle is closed to make room.

use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Result;

pub struct TableCache {
    files: Mutex<LruCache<u64, BufReader<File>>>,
}

impl TableCache {
    /// Create a cache holding at most `capacity` open files (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            files: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Run `f` against the open handle for table `id`, opening it if needed
    ///
    /// The cache lock is held for the duration of `f`; handles carry a seek
    /// position, so two lookups must never share one concurrently.
    pub fn with_file<T>(
        &self,
        id: u64,
        path: &Path,
        f: impl FnOnce(&mut BufReader<File>) -> Result<T>,
    ) -> Result<T> {
        let mut files = self.files.lock();

        if let Some(file) = files.get_mut(&id) {
            return f(file);
        }

        let file = BufReader::new(File::open(path)?);
        let file = files.get_or_insert_mut(id, || file);
        f(file)
    }

    /// Number of table files currently open
    pub fn open_files(&self) -> usize {
        self.files.lock().len()
    }

    /// Maximum number of table files kept open
    pub fn capacity(&self) -> usize {
        self.files.lock().cap().get()
    }
}
