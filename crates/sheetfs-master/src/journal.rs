//! Master journal records.
//!
//! Every metadata mutation is committed to the master group's journal topic
//! before it becomes visible, as one [`MasterEntry`]. An entry carries up to
//! three sections — a cell, a chunk, and a directory entry — each tagged
//! with the state the replica must converge to. Directory-only mutations
//! (create, recycle, resume) omit the cell and chunk sections; cell writes
//! carry cell and chunk together.

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::chunk::ChunkRow;
use crate::error::{MasterError, MasterResult};
use crate::filemgr::MapEntry;

/// State a replicated record drives its target to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    /// Insert or overwrite the target.
    Present,
    /// Remove the target.
    Absent,
}

/// Replicated cell section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    /// Desired state of the cell.
    pub target_state: TargetState,
    /// The cell itself.
    pub cell: Cell,
}

/// Replicated chunk section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Desired state of the chunk.
    pub target_state: TargetState,
    /// The chunk's persistent row.
    pub chunk: ChunkRow,
}

/// Replicated directory entry section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapEntryRecord {
    /// Desired state of the directory entry.
    pub target_state: TargetState,
    /// The directory entry itself.
    pub entry: MapEntry,
}

/// One ordered record on the master journal topic.
///
/// A cell section without a chunk section (or vice versa) is invalid and
/// aborts replay, as is a cell/chunk pair naming a sheet with no prior
/// directory entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterEntry {
    /// Cell section, present on cell mutations.
    pub cell: Option<CellRecord>,
    /// Chunk section, present on cell mutations.
    pub chunk: Option<ChunkRecord>,
    /// Directory section, present on namespace mutations.
    pub map_entry: Option<MapEntryRecord>,
}

impl MasterEntry {
    /// Record for a namespace mutation (create, recycle, resume).
    pub fn for_map_entry(entry: MapEntry) -> Self {
        Self {
            cell: None,
            chunk: None,
            map_entry: Some(MapEntryRecord {
                target_state: TargetState::Present,
                entry,
            }),
        }
    }

    /// Record for a cell mutation: the cell and its chunk travel together.
    pub fn for_mutation(cell: Cell, chunk: ChunkRow) -> Self {
        Self {
            cell: Some(CellRecord {
                target_state: TargetState::Present,
                cell,
            }),
            chunk: Some(ChunkRecord {
                target_state: TargetState::Present,
                chunk,
            }),
            map_entry: None,
        }
    }

    /// Encode for the journal bus.
    pub fn encode(&self) -> MasterResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MasterError::InvalidJournalEntry {
            reason: e.to_string(),
        })
    }

    /// Decode a record fetched from the journal bus.
    pub fn decode(raw: &[u8]) -> MasterResult<Self> {
        bincode::deserialize(raw).map_err(|e| MasterError::InvalidJournalEntry {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cell() -> Cell {
        Cell {
            cell_id: 5,
            offset: 2048,
            size: 2048,
            chunk_id: 3,
            sheet_name: "s".into(),
        }
    }

    #[test]
    fn test_mutation_entry_round_trip() {
        let entry = MasterEntry::for_mutation(
            sample_cell(),
            ChunkRow {
                id: 3,
                datanode: "dn".into(),
                version: 4,
            },
        );
        let decoded = MasterEntry::decode(&entry.encode().unwrap()).unwrap();
        assert_eq!(decoded.cell.unwrap().cell.cell_id, 5);
        assert_eq!(decoded.chunk.unwrap().chunk.version, 4);
        assert!(decoded.map_entry.is_none());
    }

    #[test]
    fn test_map_entry_record_round_trip() {
        let entry = MasterEntry::for_map_entry(MapEntry::new("s"));
        let decoded = MasterEntry::decode(&entry.encode().unwrap()).unwrap();
        let record = decoded.map_entry.unwrap();
        assert_eq!(record.target_state, TargetState::Present);
        assert_eq!(record.entry.file_name, "s");
        assert!(decoded.cell.is_none() && decoded.chunk.is_none());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            MasterEntry::decode(&[0x07, 0xff, 0xff]),
            Err(MasterError::InvalidJournalEntry { .. })
        ));
    }
}
