//! Storage Backend
//!
//! The engine contract the `Database` facade is written against. The facade
//! never looks inside the engine; it only opens, recovers, reads, writes,
//! iterates, syncs and closes through this trait.

use crate::config::Config;
use crate::engine::{Engine, EngineIterator};
use crate::error::{LodeError, Result};

/// An ordered key-value engine usable behind `Database`
pub trait StorageBackend: Sized {
    /// Ascending cursor over `(key, stored value)` pairs
    type Iter: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>;

    /// Open the store at `config.data_dir`, creating it if missing
    fn open(config: &Config) -> Result<Self>;

    /// Repair the store at `config.data_dir` and open it
    fn recover(config: &Config) -> Result<Self>;

    /// Whether a failed `open` should be answered with `recover`
    fn is_corruption(err: &LodeError) -> bool {
        err.is_corruption()
    }

    /// Stored value for `key`, or `LodeError::KeyNotFound`
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`; removing an absent key succeeds
    fn delete(&self, key: &[u8]) -> Result<()>;

    fn iter(&self) -> Self::Iter;

    /// Make every acknowledged write durable
    fn sync(&self) -> Result<()>;

    /// Release the store
    fn close(self) -> Result<()>;
}

impl StorageBackend for Engine {
    type Iter = EngineIterator;

    fn open(config: &Config) -> Result<Self> {
        Engine::open(config.clone())
    }

    fn recover(config: &Config) -> Result<Self> {
        Engine::recover(config.clone())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        Engine::get(self, key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Engine::put(self, key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        Engine::delete(self, key)
    }

    fn iter(&self) -> EngineIterator {
        Engine::iter(self)
    }

    fn sync(&self) -> Result<()> {
        Engine::sync(self)
    }

    fn close(self) -> Result<()> {
        Engine::close(self)
    }
}
