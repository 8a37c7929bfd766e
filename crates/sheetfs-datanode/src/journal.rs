//! Datanode journal entries.
//!
//! Every accepted chunk write is committed to the group's journal topic
//! before it reaches disk, as a fixed big-endian record:
//!
//! ```text
//! version(8) | chunk_id(8) | offset(8) | size(8) | crc32(4) | data(size)
//! ```
//!
//! `data` is the padded region exactly as it lands on disk (the whole
//! payload area for a freshly created chunk, the affected slot otherwise),
//! so replaying any prefix of the journal against an empty data directory
//! reproduces the primary's chunk files byte for byte.

use sheetfs_proto::CRC32_POLYNOMIAL;

use crate::error::{DataNodeError, DataNodeResult};

const HEADER_LEN: usize = 36;

/// Compute the journal checksum: reflected CRC-32 over `data` with the
/// polynomial fixed by the wire format.
pub fn checksum(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC32_POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// One record on a datanode group's journal topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Version the write installed.
    pub version: u64,
    /// Target chunk.
    pub chunk_id: u64,
    /// Byte offset of the written region inside the payload area.
    pub offset: u64,
    /// Length of the written region.
    pub size: u64,
    /// Checksum over `data`.
    pub crc32: u32,
    /// The padded region as it lands on disk.
    pub data: Vec<u8>,
}

impl JournalEntry {
    /// Build an entry for a region about to be persisted.
    pub fn new(version: u64, chunk_id: u64, offset: u64, data: Vec<u8>) -> Self {
        Self {
            version,
            chunk_id,
            offset,
            size: data.len() as u64,
            crc32: checksum(&data),
            data,
        }
    }

    /// Encode to the wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(HEADER_LEN + self.data.len());
        raw.extend_from_slice(&self.version.to_be_bytes());
        raw.extend_from_slice(&self.chunk_id.to_be_bytes());
        raw.extend_from_slice(&self.offset.to_be_bytes());
        raw.extend_from_slice(&self.size.to_be_bytes());
        raw.extend_from_slice(&self.crc32.to_be_bytes());
        raw.extend_from_slice(&self.data);
        raw
    }

    /// Decode from the wire layout, checking the length against the
    /// embedded size field.
    pub fn decode(raw: &[u8]) -> DataNodeResult<Self> {
        if raw.len() < HEADER_LEN {
            return Err(DataNodeError::BadEntry {
                reason: format!("entry of {} bytes is shorter than the header", raw.len()),
            });
        }
        let u64_at = |pos: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&raw[pos..pos + 8]);
            u64::from_be_bytes(buf)
        };
        let size = u64_at(24);
        if raw.len() != HEADER_LEN + size as usize {
            return Err(DataNodeError::BadEntry {
                reason: format!(
                    "entry of {} bytes does not match size field {}",
                    raw.len(),
                    size
                ),
            });
        }
        let mut crc_buf = [0u8; 4];
        crc_buf.copy_from_slice(&raw[32..36]);
        Ok(Self {
            version: u64_at(0),
            chunk_id: u64_at(8),
            offset: u64_at(16),
            size,
            crc32: u32::from_be_bytes(crc_buf),
            data: raw[HEADER_LEN..].to_vec(),
        })
    }
}
