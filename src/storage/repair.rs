//! Table Repair
//!
//! Salvages damaged SSTables.
//!
//! Every table is verified the same way `StorageManager::open` does. A table
//! that fails verification is moved into the `lost` directory, and the
//! entries whose framing is still intact are rewritten into a fresh table
//! under the same id, so the table keeps its place in the newest → oldest
//! order. The table checksum covers the whole data block, so damage inside a
//! value whose length fields survived cannot be told apart from good data;
//! such entries are salvaged as they are.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;

use super::sstable::{
    parse_entry_header, ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, TEMP_EXTENSION,
    TOMBSTONE_MARKER,
};
use super::{SSTableBuilder, SSTableReader, StorageManager};

/// Outcome of a table repair pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRepair {
    /// Tables examined
    pub tables_checked: usize,
    /// Tables that failed verification and were rebuilt (or dropped when
    /// nothing could be salvaged)
    pub tables_rebuilt: usize,
    /// Entries carried over from damaged tables
    pub entries_salvaged: u64,
    /// Where the damaged originals were moved
    pub quarantined: Vec<PathBuf>,
}

type SalvagedEntry = (Vec<u8>, Option<Vec<u8>>);

/// Verify every table in `dir`, rebuilding the damaged ones
pub fn repair_tables(dir: &Path, lost_dir: &Path) -> Result<TableRepair> {
    fs::create_dir_all(dir)?;
    let mut report = TableRepair::default();

    let mut ids = StorageManager::list_sstable_ids(dir)?;
    ids.sort_unstable();

    for id in ids {
        let path = StorageManager::sstable_path_with_dir(dir, id);
        report.tables_checked += 1;

        match SSTableReader::open(&path, id) {
            Ok(_) => continue,
            Err(e) if e.is_corruption() => {
                warn!(path = %path.display(), error = %e, "rebuilding damaged sstable");
            }
            Err(e) => return Err(e),
        }

        let entries = salvage(&fs::read(&path)?);
        let quarantined = quarantine(&path, lost_dir)?;

        if !entries.is_empty() {
            let mut builder = SSTableBuilder::new(&path)?;
            for (key, value) in &entries {
                match value {
                    Some(v) => builder.add(key, v)?,
                    None => builder.add_tombstone(key)?,
                }
            }
            builder.finish()?;
        }

        info!(
            original = %quarantined.display(),
            salvaged = entries.len(),
            "damaged sstable quarantined"
        );

        report.tables_rebuilt += 1;
        report.entries_salvaged += entries.len() as u64;
        report.quarantined.push(quarantined);
    }

    Ok(report)
}

/// Read entries from the start of the data block until the framing breaks
fn salvage(data: &[u8]) -> Vec<SalvagedEntry> {
    let len = data.len() as u64;
    let mut entries: Vec<SalvagedEntry> = Vec::new();
    if len < HEADER_SIZE {
        return entries;
    }

    // Trust the footer's data/index boundary only when it is plausible
    let mut end = data.len();
    if len >= HEADER_SIZE + FOOTER_SIZE {
        let footer_start = (len - FOOTER_SIZE) as usize;
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&data[footer_start..footer_start + 8]);
        let index_offset = u64::from_le_bytes(offset);
        if (HEADER_SIZE..=len - FOOTER_SIZE).contains(&index_offset) {
            end = index_offset as usize;
        }
    }

    let mut pos = HEADER_SIZE as usize;
    while pos + ENTRY_HEADER_SIZE <= end {
        let mut header = [0u8; ENTRY_HEADER_SIZE];
        header.copy_from_slice(&data[pos..pos + ENTRY_HEADER_SIZE]);
        let (key_len, val_len) = parse_entry_header(&header);

        let key_start = pos + ENTRY_HEADER_SIZE;
        let key_end = key_start + key_len;
        if key_end > end {
            break;
        }
        let key = &data[key_start..key_end];

        let (value, next) = if val_len == TOMBSTONE_MARKER {
            (None, key_end)
        } else {
            let val_end = key_end + val_len as usize;
            if val_end > end {
                break;
            }
            (Some(data[key_end..val_end].to_vec()), val_end)
        };

        // Keys in a table are strictly ascending; anything else is garbage
        if let Some((last, _)) = entries.last() {
            if key <= last.as_slice() {
                break;
            }
        }

        entries.push((key.to_vec(), value));
        pos = next;
    }

    entries
}

/// Move a damaged file into `lost_dir` without overwriting earlier casualties
fn quarantine(path: &Path, lost_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(lost_dir)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("table.{}", TEMP_EXTENSION));

    let mut target = lost_dir.join(&name);
    let mut attempt = 1;
    while target.exists() {
        target = lost_dir.join(format!("{}.{}", name, attempt));
        attempt += 1;
    }

    fs::rename(path, &target)?;
    Ok(target)
}
