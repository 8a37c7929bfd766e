//! Cell index records.

use serde::{Deserialize, Serialize};
use sheetfs_proto::META_CELL_ID;

/// Index entry mapping a `(row, col)` coordinate to its storage slot.
///
/// The cell id packs the row number into the upper 32 bits and the column
/// number into the lower 32 bits (see [`sheetfs_proto::cell_id`]); the meta
/// cell carries the sentinel id `-1`. Cells reference their chunk by id
/// rather than holding a pointer, so the owning [`SheetFile`] resolves the
/// link on lookup and snapshots stay cheap.
///
/// [`SheetFile`]: crate::sheetfile::SheetFile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Packed `(row, col)` key; `-1` for the meta cell.
    pub cell_id: i64,
    /// Byte offset of the cell's slot inside its chunk payload.
    pub offset: u64,
    /// Slot size in bytes: one slot for normal cells, the whole chunk for
    /// the meta cell.
    pub size: u64,
    /// Id of the chunk storing this cell.
    pub chunk_id: u64,
    /// Name of the owning sheet.
    pub sheet_name: String,
}

impl Cell {
    /// True when this is the sheet's meta cell.
    pub fn is_meta(&self) -> bool {
        self.cell_id == META_CELL_ID
    }
}
