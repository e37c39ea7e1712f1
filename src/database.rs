//! Database Facade
//!
//! The handle applications use. Wraps a [`StorageBackend`] with:
//! - transparent value compression ([`crate::compression`])
//! - one repair attempt when the store is found damaged at open
//! - optional latency timers and byte/miss meters ([`Instruments`])
//! - an idempotent close that never fails
//!
//! ```no_run
//! use lodestore::Database;
//!
//! let mut db = Database::open("/tmp/lodestore-demo")?;
//! db.put(b"k", b"v")?;
//! assert_eq!(db.get(b"k")?, b"v");
//! db.close();
//! # Ok::<(), lodestore::LodeError>(())
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::backend::StorageBackend;
use crate::compression::{compress, decompress};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{LodeError, Result};
use crate::metrics::Instruments;

/// A live binding to one opened store
///
/// Methods take `&self`, so a handle over a `Send + Sync` backend can be
/// shared through `Arc`. Closing needs `&mut self`; dropping an open handle
/// closes it.
pub struct Database<B: StorageBackend = Engine> {
    location: PathBuf,
    backend: Option<B>,
    instruments: Instruments,
}

impl Database {
    /// Open the embedded engine at `location` with default settings
    pub fn open(location: impl AsRef<Path>) -> Result<Self> {
        Self::open_backend(Config::at(location.as_ref()))
    }

    /// Open the embedded engine with an explicit config
    pub fn open_with_config(config: Config) -> Result<Self> {
        Self::open_backend(config)
    }
}

impl<B: StorageBackend> Database<B> {
    /// Open a backend at `config.data_dir`
    ///
    /// When the backend reports the store as corrupted, one recovery pass
    /// runs and its handle is used. Any other failure, or a failed recovery,
    /// is returned as is.
    pub fn open_backend(config: Config) -> Result<Self> {
        let location = config.data_dir.clone();

        let backend = match B::open(&config) {
            Ok(backend) => backend,
            Err(e) if B::is_corruption(&e) => {
                warn!(path = %location.display(), error = %e, "store corrupted, attempting recovery");
                B::recover(&config).map_err(|re| {
                    error!(path = %location.display(), error = %re, "recovery failed");
                    re
                })?
            }
            Err(e) => return Err(e),
        };

        info!(
            path = %location.display(),
            open_file_limit = config.open_file_limit,
            "opened database"
        );

        Ok(Self {
            location,
            backend: Some(backend),
            instruments: Instruments::default(),
        })
    }

    /// Attach instrumentation; call before the handle is shared
    pub fn with_instruments(mut self, instruments: Instruments) -> Self {
        self.instruments = instruments;
        self
    }

    pub fn instruments(&self) -> &Instruments {
        &self.instruments
    }

    /// Where the store lives
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The backend, unless the handle is closed
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    fn live(&self) -> Result<&B> {
        self.backend.as_ref().ok_or(LodeError::Closed)
    }

    /// Store `value` under `key`, compressed
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _timer = self.instruments.time_put();
        let backend = self.live()?;

        let stored = compress(value);
        self.instruments.mark_written(stored.len());
        backend.put(key, &stored)
    }

    /// Value stored under `key`, decompressed
    ///
    /// An absent key is `LodeError::KeyNotFound` and counts as one miss.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let _timer = self.instruments.time_get();
        let backend = self.live()?;

        let stored = match backend.get(key) {
            Ok(stored) => stored,
            Err(e) => {
                if e.is_not_found() {
                    self.instruments.mark_miss();
                }
                return Err(e);
            }
        };

        self.instruments.mark_read(stored.len());
        Ok(decompress(&stored)?)
    }

    /// Remove `key`; removing an absent key succeeds
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let _timer = self.instruments.time_delete();
        self.live()?.delete(key)
    }

    /// Ascending cursor over the whole store
    ///
    /// Values are yielded as stored, i.e. compressed. Pass them through
    /// [`crate::compression::decompress`] to get what `get` would return.
    pub fn new_iterator(&self) -> Result<B::Iter> {
        Ok(self.live()?.iter())
    }

    /// Make every acknowledged write durable
    pub fn flush(&self) -> Result<()> {
        self.live()?.sync()
    }

    /// Flush and release the backend
    ///
    /// Failures are logged, not returned. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.backend.is_none() {
            return;
        }

        if let Err(e) = self.flush() {
            error!(path = %self.location.display(), error = %e, "failed to flush database");
        }

        if let Some(backend) = self.backend.take() {
            if let Err(e) = backend.close() {
                error!(path = %self.location.display(), error = %e, "failed to close database");
            }
        }

        info!(path = %self.location.display(), "flushed and closed database");
    }
}

impl<B: StorageBackend> Drop for Database<B> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<B: StorageBackend> fmt::Debug for Database<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("closed", &self.is_closed())
            .field("instruments", &self.instruments)
            .finish()
    }
}
