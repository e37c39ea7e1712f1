//! # lodestore
//!
//! A durable key-value storage facade over an embedded LSM engine, with:
//! - Transparent value compression (zero-run and digest aware)
//! - Corruption-aware open: a damaged store is repaired once, then opened
//! - Optional per-operation latency timers and byte/miss meters
//! - Write-Ahead Logging (WAL) and checksummed tables for durability
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Database                             │
//! │      (compression, instruments, open/recover, close)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ StorageBackend
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Engine                              │
//! │            (Single Writer / Multi Reader)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │
//!   │  (Append)   │          │  (RwLock)   │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │   Storage   │
//!                           │  (SSTable)  │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod compression;
pub mod metrics;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod engine;

pub mod backend;
pub mod database;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LodeError, Result};
pub use config::{Config, WalSyncStrategy};
pub use engine::{Engine, EngineIterator, RepairReport};
pub use backend::StorageBackend;
pub use database::Database;
pub use metrics::{DatabaseMetrics, Instruments, Meter, StandardMeter, StandardTimer, Timer};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of lodestore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
