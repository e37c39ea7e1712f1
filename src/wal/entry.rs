//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{LodeError, Result};

/// Frame header size: LSN (8) + CRC (4) + Len (4) + header CRC (4)
pub const HEADER_SIZE: usize = 20;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

/// Frame header fields, decoded without validation
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub lsn: u64,
    pub crc: u32,
    pub len: u32,
    pub header_crc: u32,
}

impl FrameHeader {
    pub(crate) fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        let mut header_crc = [0u8; 4];
        lsn.copy_from_slice(&bytes[0..8]);
        crc.copy_from_slice(&bytes[8..12]);
        len.copy_from_slice(&bytes[12..16]);
        header_crc.copy_from_slice(&bytes[16..20]);
        Self {
            lsn: u64::from_le_bytes(lsn),
            crc: u32::from_le_bytes(crc),
            len: u32::from_le_bytes(len),
            header_crc: u32::from_le_bytes(header_crc),
        }
    }

    /// Whether LSN and Len can be trusted
    pub(crate) fn is_intact(&self) -> bool {
        header_crc(self.lsn, self.len) == self.header_crc
    }
}

impl WalEntry {
    /// Create an entry stamped with the current wall-clock time
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    /// Key touched by this entry
    pub fn key(&self) -> &[u8] {
        match &self.operation {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        bincode::serialize(&(self.timestamp, &self.operation))
            .map_err(|e| LodeError::Serialization(e.to_string()))
    }

    /// CRC over LSN, payload length and payload
    pub fn compute_crc(&self) -> Result<u32> {
        let payload = self.payload()?;
        Ok(frame_crc(self.lsn, &payload))
    }

    /// Size of the framed entry in bytes
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(HEADER_SIZE + self.payload()?.len())
    }

    /// Frame the entry: [LSN][CRC][Len][HeaderCRC][Payload]
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            LodeError::Serialization(format!("WAL payload too large: {} bytes", payload.len()))
        })?;
        let crc = frame_crc(self.lsn, &payload);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&header_crc(self.lsn, len).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Parse and verify a framed entry
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header: &[u8; HEADER_SIZE] = bytes
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| {
                LodeError::WalCorruption(format!(
                    "frame shorter than header: {} bytes",
                    bytes.len()
                ))
            })?;
        let header = FrameHeader::parse(header);
        if !header.is_intact() {
            return Err(LodeError::WalCorruption(format!(
                "frame header checksum mismatch (lsn {}, len {})",
                header.lsn, header.len
            )));
        }

        let payload = bytes
            .get(HEADER_SIZE..HEADER_SIZE + header.len as usize)
            .ok_or_else(|| {
                LodeError::WalCorruption(format!(
                    "frame truncated: expected {} payload bytes, have {}",
                    header.len,
                    bytes.len() - HEADER_SIZE
                ))
            })?;

        Self::from_payload(header, payload)
    }

    pub(crate) fn from_payload(header: FrameHeader, payload: &[u8]) -> Result<Self> {
        let actual = frame_crc(header.lsn, payload);
        if actual != header.crc {
            return Err(LodeError::WalCorruption(format!(
                "CRC mismatch at lsn {}: stored {:#010x}, computed {:#010x}",
                header.lsn, header.crc, actual
            )));
        }

        let (timestamp, operation): (u64, Operation) = bincode::deserialize(payload)
            .map_err(|e| LodeError::WalCorruption(format!("undecodable payload: {}", e)))?;

        Ok(Self {
            lsn: header.lsn,
            operation,
            timestamp,
        })
    }
}

fn frame_crc(lsn: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

fn header_crc(lsn: u64, len: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.finalize()
}
