//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.
//!
//! Two kinds of damage are told apart:
//! - an interrupted append leaves a torn final frame; it is dropped and the
//!   file truncated (`was_truncated`)
//! - a damaged frame followed by a frame that still verifies is real
//!   corruption (`entries_corrupted`); `recover` skips it and keeps reading.
//!   When the damage hits the length field, reading resumes at the next
//!   offset where a whole frame verifies.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::warn;

use crate::error::Result;

use super::reader::Frame;
use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries skipped
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the WAL was truncated (partial writes removed)
    pub was_truncated: bool,
}

struct Scan {
    entries: Vec<WalEntry>,
    result: RecoveryResult,
    /// End of the last frame worth keeping
    valid_end: u64,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Skip corrupted entries, resynchronizing past damaged headers
    /// 3. Truncate partial writes at end
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let scan = Self::scan(path)?;

        if scan.result.entries_corrupted > 0 {
            Self::rewrite(path, &scan.entries)?;
        } else if scan.result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.valid_end)?;
            file.sync_all()?;
        }

        Ok((scan.entries, scan.result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Ok(Self::scan(path)?.result)
    }

    fn scan(path: &Path) -> Result<Scan> {
        let mut reader = WalReader::open(path)?;
        let mut scan = Scan {
            entries: Vec::new(),
            result: RecoveryResult::default(),
            valid_end: 0,
        };

        loop {
            match reader.next_frame()? {
                Frame::Entry(entry) => {
                    scan.result.entries_recovered += 1;
                    scan.result.last_lsn = entry.lsn;
                    scan.entries.push(entry);
                    scan.valid_end = reader.position();
                }
                Frame::Corrupt { offset, next_offset } => {
                    if reader.is_at_end() {
                        // A bad final frame is indistinguishable from a torn write
                        scan.result.was_truncated = true;
                        break;
                    }
                    warn!(
                        path = %path.display(),
                        offset,
                        next_offset,
                        "skipping corrupted WAL entry"
                    );
                    scan.result.entries_corrupted += 1;
                }
                Frame::TornTail { offset } => {
                    warn!(path = %path.display(), offset, "WAL ends with a partial entry");
                    scan.result.was_truncated = true;
                    break;
                }
                Frame::End => break,
            }
        }

        Ok(scan)
    }

    /// Replace the WAL with only the given entries
    fn rewrite(path: &Path, entries: &[WalEntry]) -> Result<()> {
        let tmp = path.with_extension("rewrite");
        {
            let mut file = File::create(&tmp)?;
            for entry in entries {
                file.write_all(&entry.serialize()?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
