//! Per-sheet metadata: the cell and chunk index.
//!
//! A sheet is made of cells, each stored at a fixed slot inside a chunk.
//! Normal cells occupy one 2048-byte slot; the distinguished meta cell
//! (addressed by `(u32::MAX, u32::MAX)`) occupies a whole chunk of its own
//! and stores sheet-wide metadata.
//!
//! The `SheetFile` itself is not persisted: everything it holds can be
//! rebuilt by scanning the sheet's cell table in the catalog. Between
//! checkpoints, mutations live in memory and rely on the journal for fault
//! tolerance.
//!
//! Chunks and cells are owned by the maps in here. Whatever leaves the
//! sheet's lock is a snapshot (an owned copy without internal references),
//! so concurrent mutation never aliases outward-visible data.

use std::collections::HashMap;
use std::sync::RwLock;

use sheetfs_proto::{
    self as proto, cell_id, BYTES_PER_CHUNK, MAX_BYTES_PER_CELL, META_CELL_COL, META_CELL_ID,
    META_CELL_ROW,
};

use crate::alloc::DataNodeAllocator;
use crate::catalog::{self, BatchOp, Catalog};
use crate::cell::Cell;
use crate::chunk::{Chunk, ChunkRow};
use crate::error::{MasterError, MasterResult};

struct SheetIndex {
    /// Maps chunk id to chunk.
    chunks: HashMap<u64, Chunk>,
    /// Maps cell id to cell.
    cells: HashMap<i64, Cell>,
    /// Latest chunk that can still host a new cell, if any.
    last_available: Option<u64>,
}

/// One sheet's metadata index.
pub struct SheetFile {
    index: RwLock<SheetIndex>,
    filename: String,
}

impl SheetFile {
    /// Create an empty sheet. No chunk is allocated until the first cell
    /// write arrives.
    pub fn new(filename: &str) -> Self {
        Self {
            index: RwLock::new(SheetIndex {
                chunks: HashMap::new(),
                cells: HashMap::new(),
                last_available: None,
            }),
            filename: filename.to_string(),
        }
    }

    /// Rebuild a sheet from its cell table in the catalog.
    ///
    /// Scans every cell row, pulling each distinct chunk row on first sight.
    /// `last_available` becomes the first chunk in scan order that still has
    /// room once all cells are accounted for.
    pub fn load(catalog: &dyn Catalog, filename: &str) -> MasterResult<Self> {
        let mut chunks: HashMap<u64, Chunk> = HashMap::new();
        let mut cells: HashMap<i64, Cell> = HashMap::new();
        let mut seen_order: Vec<u64> = Vec::new();

        for (_key, raw) in catalog.scan_prefix(&catalog::cell_prefix(filename))? {
            let cell: Cell = catalog::decode_row(&raw)?;
            if let Some(chunk) = chunks.get_mut(&cell.chunk_id) {
                chunk.cells.push(cell.cell_id);
            } else {
                let chunk_raw = catalog.get(&catalog::chunk_key(cell.chunk_id))?.ok_or_else(
                    || MasterError::IndexCorrupt {
                        reason: format!(
                            "cell {} of sheet {} references unknown chunk {}",
                            cell.cell_id, filename, cell.chunk_id
                        ),
                    },
                )?;
                let mut chunk: Chunk = catalog::decode_row::<ChunkRow>(&chunk_raw)?.into();
                chunk.cells.push(cell.cell_id);
                seen_order.push(chunk.id);
                chunks.insert(chunk.id, chunk);
            }
            cells.insert(cell.cell_id, cell);
        }

        let last_available = seen_order
            .iter()
            .copied()
            .find(|id| chunks.get(id).map(Chunk::is_available).unwrap_or(false));

        Ok(Self {
            index: RwLock::new(SheetIndex {
                chunks,
                cells,
                last_available,
            }),
            filename: filename.to_string(),
        })
    }

    /// Name of the sheet.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Snapshots of all chunks. Order is not defined.
    pub fn all_chunks(&self) -> Vec<proto::Chunk> {
        let index = self.index.read().unwrap();
        index.chunks.values().map(Chunk::snapshot).collect()
    }

    /// Look up the cell at `(row, col)` and its chunk.
    pub fn read_cell(&self, row: u32, col: u32) -> MasterResult<(Cell, proto::Chunk)> {
        let index = self.index.read().unwrap();
        let cell = index
            .cells
            .get(&cell_id(row, col))
            .ok_or(MasterError::CellNotFound { row, col })?;
        let chunk = index
            .chunks
            .get(&cell.chunk_id)
            .ok_or_else(|| MasterError::IndexCorrupt {
                reason: format!("cell {} references unknown chunk {}", cell.cell_id, cell.chunk_id),
            })?;
        Ok((cell.clone(), chunk.snapshot()))
    }

    /// Perform the metadata mutation for a write to `(row, col)`.
    ///
    /// An existing cell keeps its slot; its chunk's version is bumped by one
    /// and the returned snapshot carries the version the datanode must see.
    /// A new cell is placed in `last_available` when it has room, otherwise
    /// a fresh chunk is allocated on a datanode picked round-robin. The meta
    /// cell always gets a brand-new chunk of its own, born full.
    pub fn write_cell(
        &self,
        row: u32,
        col: u32,
        alloc: &DataNodeAllocator,
        catalog: &dyn Catalog,
    ) -> MasterResult<(Cell, proto::Chunk)> {
        let mut index = self.index.write().unwrap();
        let index = &mut *index;
        let id = cell_id(row, col);

        if let Some(cell) = index.cells.get(&id) {
            let chunk =
                index
                    .chunks
                    .get_mut(&cell.chunk_id)
                    .ok_or_else(|| MasterError::IndexCorrupt {
                        reason: format!(
                            "cell {} references unknown chunk {}",
                            cell.cell_id, cell.chunk_id
                        ),
                    })?;
            chunk.version += 1;
            return Ok((cell.clone(), chunk.snapshot()));
        }

        if row == META_CELL_ROW && col == META_CELL_COL {
            // The meta cell owns a whole chunk; last_available is untouched
            // so a partially filled data chunk keeps filling.
            let datanode = alloc.allocate()?;
            let chunk_id = catalog.allocate_chunk_id()?;
            let mut chunk = Chunk::new(chunk_id, datanode);
            let cell = Cell {
                cell_id: META_CELL_ID,
                offset: 0,
                size: BYTES_PER_CHUNK,
                chunk_id,
                sheet_name: self.filename.clone(),
            };
            chunk.cells.push(cell.cell_id);
            chunk.version += 1;
            let snapshot = chunk.snapshot();
            index.chunks.insert(chunk_id, chunk);
            index.cells.insert(cell.cell_id, cell.clone());
            return Ok((cell, snapshot));
        }

        let chunk_id = match index
            .last_available
            .filter(|id| index.chunks.get(id).map(Chunk::is_available).unwrap_or(false))
        {
            Some(id) => id,
            None => {
                let datanode = alloc.allocate()?;
                let chunk_id = catalog.allocate_chunk_id()?;
                index.chunks.insert(chunk_id, Chunk::new(chunk_id, datanode));
                index.last_available = Some(chunk_id);
                chunk_id
            }
        };

        let chunk = index
            .chunks
            .get_mut(&chunk_id)
            .ok_or_else(|| MasterError::IndexCorrupt {
                reason: format!("last available chunk {} missing", chunk_id),
            })?;
        let cell = Cell {
            cell_id: id,
            // Slots are assigned in insertion order.
            offset: chunk.cells.len() as u64 * MAX_BYTES_PER_CELL,
            size: MAX_BYTES_PER_CELL,
            chunk_id,
            sheet_name: self.filename.clone(),
        };
        chunk.cells.push(cell.cell_id);
        chunk.version += 1;
        let snapshot = chunk.snapshot();
        index.cells.insert(cell.cell_id, cell.clone());
        Ok((cell, snapshot))
    }

    /// Append catalog upserts for every cell and chunk to `batch`. Called
    /// under the checkpoint's atomic batch.
    pub fn persist_ops(&self, batch: &mut Vec<BatchOp>) -> MasterResult<()> {
        let index = self.index.read().unwrap();
        for cell in index.cells.values() {
            batch.push(BatchOp::Put {
                key: catalog::cell_key(&self.filename, cell.cell_id),
                value: catalog::encode_row(cell)?,
            });
        }
        for chunk in index.chunks.values() {
            batch.push(BatchOp::Put {
                key: catalog::chunk_key(chunk.id),
                value: catalog::encode_row(&chunk.row())?,
            });
        }
        Ok(())
    }

    /// Apply a replicated chunk record. Present records insert or overwrite
    /// the chunk (preserving an existing cell list); absent records drop it.
    pub fn apply_chunk(&self, row: ChunkRow, present: bool) {
        let mut index = self.index.write().unwrap();
        if present {
            match index.chunks.get_mut(&row.id) {
                Some(chunk) => {
                    chunk.datanode = row.datanode;
                    // Entries for one chunk may be committed out of order by
                    // racing writers; the version must never regress.
                    chunk.version = chunk.version.max(row.version);
                }
                None => {
                    index.chunks.insert(row.id, row.into());
                }
            }
        } else {
            index.chunks.remove(&row.id);
            if index.last_available == Some(row.id) {
                index.last_available = None;
            }
        }
    }

    /// Apply a replicated cell record. Mirrors the primary's placement: a
    /// newly inserted non-meta cell marks its chunk as the latest available
    /// one, which is exactly what the primary's `last_available` pointed at
    /// when the entry was committed.
    pub fn apply_cell(&self, cell: Cell, present: bool) -> MasterResult<()> {
        let mut index = self.index.write().unwrap();
        let index = &mut *index;
        if present {
            if !index.chunks.contains_key(&cell.chunk_id) {
                return Err(MasterError::InvalidJournalEntry {
                    reason: format!(
                        "cell {} references chunk {} absent from sheet {}",
                        cell.cell_id, cell.chunk_id, self.filename
                    ),
                });
            }
            let is_new = !index.cells.contains_key(&cell.cell_id);
            if is_new {
                if let Some(chunk) = index.chunks.get_mut(&cell.chunk_id) {
                    chunk.cells.push(cell.cell_id);
                }
                if !cell.is_meta() {
                    index.last_available = Some(cell.chunk_id);
                }
            }
            index.cells.insert(cell.cell_id, cell);
        } else if let Some(removed) = index.cells.remove(&cell.cell_id) {
            if let Some(chunk) = index.chunks.get_mut(&removed.chunk_id) {
                chunk.cells.retain(|&id| id != removed.cell_id);
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn chunk_count(&self) -> usize {
        self.index.read().unwrap().chunks.len()
    }
}
