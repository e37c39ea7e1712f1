//! SSTable Iterator
//!
//! Sequential iteration over all entries in an SSTable.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::TableCache;

use super::{parse_entry_header, ENTRY_HEADER_SIZE, HEADER_SIZE, TOMBSTONE_MARKER};

/// Bytes of entries decoded per visit to the table cache
const BATCH_BYTES: u64 = 64 * 1024;

type Entry = (Vec<u8>, Option<Vec<u8>>);

/// Iterator over SSTable entries in sorted key order
///
/// Holds no file handle of its own. Entries are read in batches through the
/// table cache, so any number of live scans stays within the open-file limit.
/// Tables are immutable, which keeps the scan consistent with whatever the
/// reader verified.
pub struct SSTableIterator {
    id: u64,
    path: PathBuf,
    cache: Arc<TableCache>,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    /// File offset of the first entry not yet buffered
    current_offset: u64,
    buffered: VecDeque<Entry>,
    /// Set after an error; the scan does not resume
    failed: bool,
}

impl SSTableIterator {
    pub(super) fn new(id: u64, path: PathBuf, end_offset: u64, cache: Arc<TableCache>) -> Self {
        Self {
            id,
            path,
            cache,
            end_offset,
            current_offset: HEADER_SIZE,
            buffered: VecDeque::new(),
            failed: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let (start, end) = (self.current_offset, self.end_offset);
        let (batch, next_offset) = self
            .cache
            .with_file(self.id, &self.path, |file| read_batch(file, start, end))?;

        self.buffered = batch;
        self.current_offset = next_offset;
        Ok(())
    }
}

/// Decode entries from `start` until the batch budget or `end` is reached
fn read_batch(file: &mut BufReader<File>, start: u64, end: u64) -> Result<(VecDeque<Entry>, u64)> {
    file.seek(SeekFrom::Start(start))?;

    let mut batch = VecDeque::new();
    let mut offset = start;
    while offset < end && offset - start < BATCH_BYTES {
        let mut header = [0u8; ENTRY_HEADER_SIZE];
        file.read_exact(&mut header)?;
        let (key_len, val_len) = parse_entry_header(&header);

        let mut key = vec![0u8; key_len];
        file.read_exact(&mut key)?;
        offset += (ENTRY_HEADER_SIZE + key_len) as u64;

        let value = if val_len == TOMBSTONE_MARKER {
            None
        } else {
            let mut v = vec![0u8; val_len as usize];
            file.read_exact(&mut v)?;
            offset += val_len as u64;
            Some(v)
        };

        batch.push_back((key, value));
    }

    Ok((batch, offset))
}

impl Iterator for SSTableIterator {
    /// (key, Option<value>), where a None value means tombstone
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if self.buffered.is_empty() {
            if self.current_offset >= self.end_offset {
                return None;
            }
            if let Err(e) = self.fill() {
                self.failed = true;
                return Some(Err(e));
            }
        }

        self.buffered.pop_front().map(Ok)
    }
}
