//! Request and reply message types for both RPC surfaces.
//!
//! Messages are serialized with bincode. Every reply carries a [`Status`];
//! transport-level failures are reported separately through
//! [`crate::service::RpcError`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::service::{RpcError, RpcResult};

/// Serialize any serde-compatible message to bytes using bincode.
pub fn serialize_message<T: Serialize>(msg: &T) -> RpcResult<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| RpcError::Serialization(e.to_string()))
}

/// Deserialize bytes to a message using bincode.
pub fn deserialize_message<T: DeserializeOwned>(data: &[u8]) -> RpcResult<T> {
    bincode::deserialize(data).map_err(|e| RpcError::Serialization(e.to_string()))
}

/// Outcome code carried in every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// The operation succeeded.
    Ok,
    /// The named sheet, fd or chunk does not exist.
    NotFound,
    /// A sheet with the requested name already exists (possibly recycled).
    Exist,
    /// The request referred to a cell that was never written, or carried
    /// malformed parameters.
    Invalid,
    /// Version arbitration failed; the caller should retry.
    WrongVersion,
    /// No datanode is available, or the server hit an internal failure.
    Unavailable,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "OK",
            Status::NotFound => "NotFound",
            Status::Exist => "Exist",
            Status::Invalid => "Invalid",
            Status::WrongVersion => "WrongVersion",
            Status::Unavailable => "Unavailable",
        };
        write!(f, "{}", s)
    }
}

/// A chunk descriptor as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk identifier, unique across the filesystem.
    pub id: u64,
    /// Address of the datanode group storing this chunk.
    pub datanode: String,
    /// Version the master currently associates with the chunk.
    pub version: u64,
    /// True when the chunk stores a sheet's meta cell (derived, never stored).
    pub holds_meta: bool,
}

/// A cell descriptor: the chunk it lives in plus its slot geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// The chunk storing this cell.
    pub chunk: Chunk,
    /// Byte offset of the cell's slot inside the chunk payload.
    pub offset: u64,
    /// Size of the cell's slot in bytes.
    pub size: u64,
}

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetEntry {
    /// Sheet name.
    pub filename: String,
    /// True when the sheet is soft-deleted.
    pub recycled: bool,
}

/// Announce a datanode group's client-facing address to the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDataNodeRequest {
    /// The datanode group's client-facing address.
    pub addr: String,
}

/// Reply to [`RegisterDataNodeRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDataNodeReply {
    /// Outcome of the registration.
    pub status: Status,
}

/// Create a new sheet and open it immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSheetRequest {
    /// Name of the sheet to create.
    pub filename: String,
}

/// Reply to [`CreateSheetRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSheetReply {
    /// Outcome; `Exist` when the name is taken, even by a recycled sheet.
    pub status: Status,
    /// Fd of the newly created sheet, valid when status is `Ok`.
    pub fd: u64,
}

/// Open an existing sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSheetRequest {
    /// Name of the sheet to open.
    pub filename: String,
}

/// Reply to [`OpenSheetRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSheetReply {
    /// Outcome; `NotFound` when missing or recycled.
    pub status: Status,
    /// Fd of the opened sheet, valid when status is `Ok`.
    pub fd: u64,
}

/// Soft-delete a sheet by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSheetRequest {
    /// Name of the sheet to delete.
    pub filename: String,
}

/// Reply to [`DeleteSheetRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSheetReply {
    /// Outcome; `NotFound` when no sheet carries the name.
    pub status: Status,
}

/// List all chunks of an opened sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadSheetRequest {
    /// Fd of the sheet to scan.
    pub fd: u64,
}

/// Reply to [`ReadSheetRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadSheetReply {
    /// Outcome of the scan.
    pub status: Status,
    /// Every chunk of the sheet; order is not defined.
    pub chunks: Vec<Chunk>,
}

/// Look up the cell at `(row, col)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCellRequest {
    /// Fd of the sheet.
    pub fd: u64,
    /// Row coordinate.
    pub row: u32,
    /// Column coordinate.
    pub col: u32,
}

/// Reply to [`ReadCellRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCellReply {
    /// Outcome; `Invalid` when the cell was never written.
    pub status: Status,
    /// Descriptor of the cell, valid when status is `Ok`. Carries the
    /// chunk's current version.
    pub cell: Option<Cell>,
}

/// Reserve a write slot for the cell at `(row, col)`, creating it if needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteCellRequest {
    /// Fd of the sheet.
    pub fd: u64,
    /// Row coordinate.
    pub row: u32,
    /// Column coordinate.
    pub col: u32,
}

/// Reply to [`WriteCellRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteCellReply {
    /// Outcome; `Unavailable` when no datanode is registered.
    pub status: Status,
    /// Descriptor of the cell, valid when status is `Ok`. Carries the
    /// version the datanode must observe for this write to be accepted.
    pub cell: Option<Cell>,
}

/// Mark a sheet as recycled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecycleSheetRequest {
    /// Name of the sheet to recycle.
    pub filename: String,
}

/// Reply to [`RecycleSheetRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecycleSheetReply {
    /// Outcome of the recycle request.
    pub status: Status,
}

/// Clear a sheet's recycled flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeSheetRequest {
    /// Name of the sheet to resume.
    pub filename: String,
}

/// Reply to [`ResumeSheetRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeSheetReply {
    /// Outcome of the resume request.
    pub status: Status,
}

/// List every sheet in the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSheetsRequest {}

/// Reply to [`ListSheetsRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSheetsReply {
    /// Outcome of the listing.
    pub status: Status,
    /// One entry per sheet, recycled ones included.
    pub sheets: Vec<SheetEntry>,
}

/// Read a byte range out of a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadChunkRequest {
    /// Chunk identifier.
    pub id: u64,
    /// Byte offset of the range inside the payload region.
    pub offset: u64,
    /// Length of the range in bytes.
    pub size: u64,
    /// Version the caller obtained from the master. The read succeeds only
    /// when the on-disk version is not newer than this.
    pub version: u64,
}

/// Reply to [`ReadChunkRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadChunkReply {
    /// Outcome; `WrongVersion` means the caller is racing a writer.
    pub status: Status,
    /// The requested bytes, valid when status is `Ok`.
    pub data: Vec<u8>,
}

/// Write a cell's bytes into a chunk at a specific version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteChunkRequest {
    /// Chunk identifier.
    pub id: u64,
    /// Byte offset of the target slot inside the payload region.
    pub offset: u64,
    /// Length of `data` in bytes.
    pub size: u64,
    /// Version this write installs. Must equal the on-disk version plus one
    /// (or exactly 1 for a chunk file that does not exist yet).
    pub version: u64,
    /// Pad byte for the remainder of the slot.
    pub padding: u8,
    /// The bytes to write.
    pub data: Vec<u8>,
}

/// Reply to [`WriteChunkRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteChunkReply {
    /// Outcome; `WrongVersion` means the version check failed.
    pub status: Status,
}

/// Remove a chunk file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChunkRequest {
    /// Chunk identifier.
    pub id: u64,
}

/// Reply to [`DeleteChunkRequest`]. Deletion is idempotent and always `Ok`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteChunkReply {
    /// Outcome of the deletion.
    pub status: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let req = WriteChunkRequest {
            id: 42,
            offset: 2048,
            size: 12,
            version: 7,
            padding: b' ',
            data: b"this is test".to_vec(),
        };
        let bytes = serialize_message(&req).unwrap();
        let back: WriteChunkRequest = deserialize_message(&bytes).unwrap();
        assert_eq!(back.id, 42);
        assert_eq!(back.version, 7);
        assert_eq!(back.data, b"this is test");
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        let result: RpcResult<ReadSheetReply> = deserialize_message(&[0xff, 0x01]);
        assert!(result.is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Ok.to_string(), "OK");
        assert_eq!(Status::WrongVersion.to_string(), "WrongVersion");
    }
}
