#![warn(missing_docs)]

//! SheetFS wire protocol: message types, status codes, and service traits.
//!
//! This crate is the shared vocabulary between the master, the datanodes and
//! the client library:
//! - Request/reply message types for both RPC surfaces, serialized with bincode
//! - The `Status` enum carried in every reply
//! - `MasterService` / `DataNodeService` traits that servers implement and
//!   clients consume, keeping the actual transport pluggable
//! - System-wide constants (chunk geometry, CRC polynomial, meta sentinel)

pub mod consts;
pub mod message;
pub mod service;

pub use consts::*;
pub use message::{deserialize_message, serialize_message, Status};
pub use message::{
    Cell, Chunk, CreateSheetReply, CreateSheetRequest, DeleteChunkReply, DeleteChunkRequest,
    DeleteSheetReply, DeleteSheetRequest, ListSheetsReply, ListSheetsRequest, OpenSheetReply,
    OpenSheetRequest, ReadCellReply, ReadCellRequest, ReadChunkReply, ReadChunkRequest,
    ReadSheetReply, ReadSheetRequest, RecycleSheetReply, RecycleSheetRequest,
    RegisterDataNodeReply, RegisterDataNodeRequest, ResumeSheetReply, ResumeSheetRequest,
    SheetEntry, WriteCellReply, WriteCellRequest, WriteChunkReply, WriteChunkRequest,
};
pub use service::{Connector, DataNodeService, MasterService, RpcError, RpcResult};

/// Compute the cell id for a `(row, col)` coordinate.
///
/// The row number occupies the upper 32 bits and the column number the lower
/// 32 bits. The result is signed because the catalog lacks an unsigned 64-bit
/// column type; the meta cell at `(u32::MAX, u32::MAX)` maps to `-1`.
pub fn cell_id(row: u32, col: u32) -> i64 {
    (((row as u64) << 32) | col as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_packs_row_and_col() {
        assert_eq!(cell_id(0, 0), 0);
        assert_eq!(cell_id(0, 7), 7);
        assert_eq!(cell_id(1, 0), 1 << 32);
        assert_eq!(cell_id(3, 5), (3 << 32) | 5);
    }

    #[test]
    fn test_meta_coordinates_map_to_sentinel() {
        assert_eq!(cell_id(META_CELL_ROW, META_CELL_COL), META_CELL_ID);
        assert_eq!(META_CELL_ID, -1);
    }
}
