//! SSTable Reader
//!
//! Opens and verifies SSTable files and provides O(log n) key lookups via an
//! in-memory index. The reader holds no file handle of its own: lookups borrow
//! one from the storage manager's table cache.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::storage::TableCache;
use crate::LodeError;

use super::iterator::SSTableIterator;
use super::{
    corruption, parse_entry_header, ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, MAGIC,
    TOMBSTONE_MARKER, VERSION,
};

/// Reader for SSTable files with in-memory index for O(log n) lookups
#[derive(Debug)]
pub struct SSTableReader {
    /// Table id (from the file name)
    id: u64,
    /// Location of the table file
    path: PathBuf,
    /// In-memory index: key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    /// Metadata
    entry_count: u64,
    /// Index block starting offset (end of the data block)
    index_offset: u64,
}

impl SSTableReader {
    /// Open an SSTable, verify it and load its index
    ///
    /// The whole data block is checksummed, so a table that opens cleanly is
    /// known to hold exactly what the builder wrote.
    pub fn open(path: &Path, id: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(corruption(path, format!("file too small ({} bytes)", file_size)));
        }

        // Header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(corruption(
                path,
                format!("invalid magic: expected LODE, got {:?}", &header[0..4]),
            ));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(corruption(path, format!("unsupported version {}", version)));
        }

        let mut count = [0u8; 8];
        count.copy_from_slice(&header[6..14]);
        let entry_count = u64::from_le_bytes(count);

        // Footer
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let mut offset_bytes = [0u8; 8];
        offset_bytes.copy_from_slice(&footer[0..8]);
        let index_offset = u64::from_le_bytes(offset_bytes);
        let data_crc = u32::from_le_bytes([footer[8], footer[9], footer[10], footer[11]]);

        let index_end = file_size - FOOTER_SIZE;
        if index_offset < HEADER_SIZE || index_offset > index_end {
            return Err(corruption(
                path,
                format!("index offset {} outside [{}, {}]", index_offset, HEADER_SIZE, index_end),
            ));
        }

        // Data block checksum
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let actual_crc = checksum(&mut (&mut file).take(index_offset - HEADER_SIZE))?;
        if actual_crc != data_crc {
            return Err(corruption(
                path,
                format!(
                    "data checksum mismatch: stored {:#010x}, computed {:#010x}",
                    data_crc, actual_crc
                ),
            ));
        }

        // Index block: [key_len(4)][offset(8)][key]
        let mut index_data = vec![0u8; (index_end - index_offset) as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut index_data)?;

        let index = parse_index(path, &index_data, index_offset)?;
        if index.len() as u64 != entry_count {
            return Err(corruption(
                path,
                format!("header counts {} entries, index holds {}", entry_count, index.len()),
            ));
        }

        Ok(Self {
            id,
            path: path.to_path_buf(),
            index,
            entry_count,
            index_offset,
        })
    }

    /// Get a value by key, O(log n) lookup via the in-memory index
    ///
    /// Returns:
    /// - `Ok(Some(value))`: key found with value
    /// - `Ok(None)`: key found but is a tombstone (deleted)
    /// - `Err(KeyNotFound)`: key not in this SSTable
    pub fn get(&self, key: &[u8], file: &mut BufReader<File>) -> Result<Option<Vec<u8>>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Err(LodeError::KeyNotFound),
        };

        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; ENTRY_HEADER_SIZE];
        file.read_exact(&mut header)?;
        let (key_len, val_len) = parse_entry_header(&header);

        if key_len != key.len() {
            return Err(corruption(
                &self.path,
                format!("entry at offset {} has key length {}, index says {}", offset, key_len, key.len()),
            ));
        }

        // Skip the key (the index already matched it)
        file.seek(SeekFrom::Current(key_len as i64))?;

        if val_len == TOMBSTONE_MARKER {
            return Ok(None);
        }

        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;

        Ok(Some(value))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Get the minimum key in this SSTable (for range filtering)
    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    /// Get the maximum key in this SSTable (for range filtering)
    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false, // Empty SSTable
        }
    }

    /// Sequential scan over all entries, with a private one-file cache
    pub fn iter(&self) -> SSTableIterator {
        self.iter_cached(Arc::new(TableCache::new(1)))
    }

    /// Sequential scan that reads through a shared table cache
    pub fn iter_cached(&self, cache: Arc<TableCache>) -> SSTableIterator {
        SSTableIterator::new(self.id, self.path.clone(), self.index_offset, cache)
    }
}

fn checksum(reader: &mut impl Read) -> io::Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(hasher.finalize());
        }
        hasher.update(&buf[..n]);
    }
}

fn parse_index(path: &Path, data: &[u8], data_end: u64) -> Result<BTreeMap<Vec<u8>, u64>> {
    let mut index = BTreeMap::new();
    let mut pos = 0;

    while pos < data.len() {
        let fixed = data
            .get(pos..pos + 12)
            .ok_or_else(|| corruption(path, format!("truncated index entry at {}", pos)))?;
        let key_len = u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]) as usize;
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&fixed[4..12]);
        let offset = u64::from_le_bytes(offset);
        pos += 12;

        let key = data
            .get(pos..pos + key_len)
            .ok_or_else(|| corruption(path, format!("truncated index key at {}", pos)))?;
        pos += key_len;

        if offset < HEADER_SIZE || offset >= data_end {
            return Err(corruption(path, format!("index points outside data block: {}", offset)));
        }

        index.insert(key.to_vec(), offset);
    }

    Ok(index)
}
