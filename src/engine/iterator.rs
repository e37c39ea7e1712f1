//! Engine Iterator
//!
//! Merges the memtable snapshot and every SSTable into one ascending cursor.
//!
//! Sources are ordered newest first. When several sources hold the same key,
//! the newest one wins and the others are skipped; a winning tombstone hides
//! the key entirely.

use crate::error::Result;
use crate::memtable::MemTableIterator;
use crate::storage::SSTableIterator;

type Item = (Vec<u8>, Option<Vec<u8>>);
type Source = Box<dyn Iterator<Item = Result<Item>> + Send>;

/// Ascending cursor over live key-value pairs, values exactly as stored
///
/// The memtable and the table list are captured together when the iterator
/// is created; tables are immutable, so later writes are not observed. I/O errors are yielded as
/// items, after which the iterator is exhausted.
pub struct EngineIterator {
    sources: Vec<Source>,
    heads: Vec<Option<Item>>,
    primed: bool,
    failed: bool,
}

impl EngineIterator {
    pub(crate) fn new(memtable: MemTableIterator, tables: Vec<SSTableIterator>) -> Self {
        let mut sources: Vec<Source> = Vec::with_capacity(tables.len() + 1);
        sources.push(Box::new(
            memtable.map(|(key, entry)| Ok((key, entry.into_value()))),
        ));
        for table in tables {
            sources.push(Box::new(table));
        }

        let heads = sources.iter().map(|_| None).collect();
        Self {
            sources,
            heads,
            primed: false,
            failed: false,
        }
    }

    /// Pull the next item of source `i` into its head slot
    fn advance(&mut self, i: usize) -> Result<()> {
        self.heads[i] = self.sources[i].next().transpose()?;
        Ok(())
    }

    /// Index of the source holding the smallest key; ties go to the newest
    fn smallest(&self) -> Option<usize> {
        let mut best: Option<(usize, &[u8])> = None;
        for (i, head) in self.heads.iter().enumerate() {
            if let Some((key, _)) = head {
                if best.map_or(true, |(_, k)| key.as_slice() < k) {
                    best = Some((i, key.as_slice()));
                }
            }
        }
        best.map(|(i, _)| i)
    }

    fn next_live(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.primed {
            for i in 0..self.sources.len() {
                self.advance(i)?;
            }
            self.primed = true;
        }

        loop {
            let Some(winner) = self.smallest() else {
                return Ok(None);
            };
            let Some((key, value)) = self.heads[winner].take() else {
                return Ok(None);
            };

            // Older versions of the same key are shadowed
            for i in 0..self.heads.len() {
                let shadowed = matches!(&self.heads[i], Some((k, _)) if *k == key);
                if i == winner || shadowed {
                    self.advance(i)?;
                }
            }

            if let Some(value) = value {
                return Ok(Some((key, value)));
            }
        }
    }
}

impl Iterator for EngineIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_live() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
