//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;

use super::entry::FrameHeader;
use super::{WalEntry, HEADER_SIZE};

/// One step of a WAL scan
#[derive(Debug)]
pub(crate) enum Frame {
    /// A verified entry
    Entry(WalEntry),

    /// A damaged frame. `next_offset` is where reading resumes: the end of
    /// the frame when its header is intact, otherwise the next offset holding
    /// a frame that verifies (or end of file).
    Corrupt { offset: u64, next_offset: u64 },

    /// The file ends inside a frame (interrupted append)
    TornTail { offset: u64 },

    /// Clean end of file
    End,
}

/// Reads entries from the WAL file
pub struct WalReader {
    reader: BufReader<File>,
    position: u64,
    file_len: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
        })
    }

    /// Offset of the next unread frame
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at end of file and at an interrupted final frame;
    /// a damaged complete frame is a `WalCorruption` error.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        match self.next_frame()? {
            Frame::Entry(entry) => Ok(Some(entry)),
            Frame::End | Frame::TornTail { .. } => Ok(None),
            Frame::Corrupt { offset, .. } => Err(crate::LodeError::WalCorruption(format!(
                "damaged frame at offset {}",
                offset
            ))),
        }
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        let offset = self.position;
        let remaining = self.file_len - offset;

        if remaining == 0 {
            return Ok(Frame::End);
        }
        if remaining < HEADER_SIZE as u64 {
            self.position = self.file_len;
            return Ok(Frame::TornTail { offset });
        }

        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        let header = FrameHeader::parse(&header);

        // The length cannot be trusted, so neither can the frame boundary
        if !header.is_intact() {
            let next_offset = self.resync(offset + 1)?;
            return Ok(Frame::Corrupt {
                offset,
                next_offset,
            });
        }

        let frame_len = HEADER_SIZE as u64 + header.len as u64;
        if frame_len > remaining {
            self.position = self.file_len;
            return Ok(Frame::TornTail { offset });
        }

        let mut payload = vec![0u8; header.len as usize];
        self.reader.read_exact(&mut payload)?;
        self.position = offset + frame_len;

        match WalEntry::from_payload(header, &payload) {
            Ok(entry) => Ok(Frame::Entry(entry)),
            Err(_) => Ok(Frame::Corrupt {
                offset,
                next_offset: self.position,
            }),
        }
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.position == self.file_len
    }

    /// Move to the first offset at or after `from` where a whole frame
    /// verifies, or to end of file when there is none
    fn resync(&mut self, from: u64) -> Result<u64> {
        self.reader.seek(SeekFrom::Start(from))?;
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest)?;

        self.position = match find_frame(&rest) {
            Some(skip) => from + skip as u64,
            None => self.file_len,
        };
        self.reader.seek(SeekFrom::Start(self.position))?;
        Ok(self.position)
    }
}

/// Offset of the first complete, verifiable frame in `bytes`
fn find_frame(bytes: &[u8]) -> Option<usize> {
    (0..bytes.len()).find(|&start| {
        let Some(header) = bytes
            .get(start..start + HEADER_SIZE)
            .and_then(|h| <&[u8; HEADER_SIZE]>::try_from(h).ok())
        else {
            return false;
        };
        let header = FrameHeader::parse(header);
        if !header.is_intact() {
            return false;
        }

        let payload_start = start + HEADER_SIZE;
        bytes
            .get(payload_start..payload_start + header.len as usize)
            .is_some_and(|payload| WalEntry::from_payload(header, payload).is_ok())
    })
}

/// Iterator over WAL entries
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
