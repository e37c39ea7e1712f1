//! Error types for lodestore
//!
//! Provides a unified error type for the facade and the embedded engine.

use thiserror::Error;

use crate::compression::DecodeError;

/// Result type alias using LodeError
pub type Result<T> = std::result::Result<T, LodeError>;

/// Unified error type for lodestore operations
#[derive(Debug, Error)]
pub enum LodeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// On-disk state is damaged. Raised while opening; the facade reacts to it
    /// with a single repair attempt.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Malformed compressed value: {0}")]
    Decode(#[from] DecodeError),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Key not found")]
    KeyNotFound,

    #[error("Database is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl LodeError {
    /// Whether this error means the on-disk structure is damaged and a repair
    /// pass may bring the store back.
    pub fn is_corruption(&self) -> bool {
        matches!(self, LodeError::Corruption(_) | LodeError::WalCorruption(_))
    }

    /// Whether this is the ordinary "key absent" outcome of a lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LodeError::KeyNotFound)
    }
}
