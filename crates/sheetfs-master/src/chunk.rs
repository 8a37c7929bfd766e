//! Chunk index records.

use serde::{Deserialize, Serialize};
use sheetfs_proto::{self as proto, MAX_CELLS_PER_CHUNK, META_CELL_ID};

/// A fixed-size storage unit placed on one datanode group.
///
/// The version serializes writes: the master predicts the next value and
/// hands it to the client, the datanode accepts a write only when it carries
/// the persisted version plus one. The master's copy never decreases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk id, allocated monotonically by the catalog.
    pub id: u64,
    /// Address of the datanode group storing the chunk.
    pub datanode: String,
    /// Latest version the master has handed out for this chunk.
    pub version: u64,
    /// Ids of resident cells in insertion order. Drives slot assignment for
    /// future cells; never serialized outward.
    pub cells: Vec<i64>,
}

/// Persistent form of a chunk. The cell list is not stored: it is rebuilt
/// from the cell table when a sheet is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRow {
    /// Chunk id.
    pub id: u64,
    /// Datanode group address.
    pub datanode: String,
    /// Version at the time of the snapshot.
    pub version: u64,
}

impl Chunk {
    /// Create an empty chunk at version 0. The first cell insertion bumps
    /// the version to 1, which is the version the datanode expects for the
    /// first write to a chunk file.
    pub fn new(id: u64, datanode: String) -> Self {
        Self {
            id,
            datanode,
            version: 0,
            cells: Vec::new(),
        }
    }

    /// True when the chunk can host another cell.
    pub fn is_available(&self) -> bool {
        !self.holds_meta() && self.cells.len() < MAX_CELLS_PER_CHUNK
    }

    /// True when the chunk stores a sheet's meta cell. Derived from the cell
    /// list; never persisted.
    pub fn holds_meta(&self) -> bool {
        self.cells.len() == 1 && self.cells[0] == META_CELL_ID
    }

    /// Outward-facing copy without the internal cell list. `holds_meta` is
    /// computed here, at serialization time.
    pub fn snapshot(&self) -> proto::Chunk {
        proto::Chunk {
            id: self.id,
            datanode: self.datanode.clone(),
            version: self.version,
            holds_meta: self.holds_meta(),
        }
    }

    /// Persistent row for the catalog.
    pub fn row(&self) -> ChunkRow {
        ChunkRow {
            id: self.id,
            datanode: self.datanode.clone(),
            version: self.version,
        }
    }
}

impl From<ChunkRow> for Chunk {
    fn from(row: ChunkRow) -> Self {
        Self {
            id: row.id,
            datanode: row.datanode,
            version: row.version,
            cells: Vec::new(),
        }
    }
}
