//! On-disk catalog used for checkpoints.
//!
//! The catalog is an external collaborator with a transactional key-value
//! contract: point get/put, prefix scan, atomic batches, and a monotonic
//! chunk-id sequence. Checkpoints flush the directory, every resident cell
//! and chunk, and the journal replay offset in one batch. Between
//! checkpoints all mutation lives in memory and relies on the journal.
//!
//! Rows are bincode-encoded under typed key prefixes:
//! `map_entry/<name>`, `chunk/<id>`, `cell/<sheet>/<cell_id>`, `checkpoint`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MasterError, MasterResult};

/// Key under which the checkpoint row is stored.
pub const CHECKPOINT_KEY: &[u8] = b"checkpoint";

const NEXT_CHUNK_ID_KEY: &[u8] = b"next_chunk_id";

/// A single operation in an atomic batch.
pub enum BatchOp {
    /// Insert or overwrite a row.
    Put {
        /// Row key.
        key: Vec<u8>,
        /// Encoded row value.
        value: Vec<u8>,
    },
    /// Remove a row.
    Delete {
        /// Row key.
        key: Vec<u8>,
    },
}

/// Transactional catalog contract.
pub trait Catalog: Send + Sync {
    /// Get a row by key.
    fn get(&self, key: &[u8]) -> MasterResult<Option<Vec<u8>>>;

    /// Insert or overwrite a row.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> MasterResult<()>;

    /// Scan all rows whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> MasterResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply a batch of operations atomically.
    fn write_batch(&self, ops: Vec<BatchOp>) -> MasterResult<()>;

    /// Hand out the next chunk id. Ids are monotonic and survive restarts.
    fn allocate_chunk_id(&self) -> MasterResult<u64>;
}

/// In-memory catalog backed by a BTreeMap. Does not survive restarts; the
/// production deployment plugs in a durable store with the same contract.
pub struct MemoryCatalog {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog for MemoryCatalog {
    fn get(&self, key: &[u8]) -> MasterResult<Option<Vec<u8>>> {
        let data = self
            .data
            .read()
            .map_err(|e| MasterError::Catalog(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> MasterResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| MasterError::Catalog(e.to_string()))?;
        data.insert(key, value);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> MasterResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self
            .data
            .read()
            .map_err(|e| MasterError::Catalog(e.to_string()))?;
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> MasterResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| MasterError::Catalog(e.to_string()))?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn allocate_chunk_id(&self) -> MasterResult<u64> {
        let mut data = self
            .data
            .write()
            .map_err(|e| MasterError::Catalog(e.to_string()))?;
        let next = match data.get(NEXT_CHUNK_ID_KEY) {
            Some(raw) => decode_row::<u64>(raw)?,
            None => 1,
        };
        data.insert(NEXT_CHUNK_ID_KEY.to_vec(), encode_row(&(next + 1))?);
        Ok(next)
    }
}

/// Key of a directory entry row.
pub fn map_entry_key(filename: &str) -> Vec<u8> {
    let mut key = b"map_entry/".to_vec();
    key.extend_from_slice(filename.as_bytes());
    key
}

/// Prefix covering all directory entry rows.
pub fn map_entry_prefix() -> Vec<u8> {
    b"map_entry/".to_vec()
}

/// Key of a chunk row.
pub fn chunk_key(id: u64) -> Vec<u8> {
    let mut key = b"chunk/".to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Key of a cell row inside a sheet's cell table.
pub fn cell_key(sheet: &str, cell_id: i64) -> Vec<u8> {
    let mut key = cell_prefix(sheet);
    key.extend_from_slice(&(cell_id as u64).to_be_bytes());
    key
}

/// Prefix covering one sheet's cell table.
pub fn cell_prefix(sheet: &str) -> Vec<u8> {
    let mut key = b"cell/".to_vec();
    key.extend_from_slice(sheet.as_bytes());
    key.push(b'/');
    key
}

/// Encode a row value with bincode.
pub fn encode_row<T: Serialize>(row: &T) -> MasterResult<Vec<u8>> {
    bincode::serialize(row).map_err(|e| MasterError::Catalog(e.to_string()))
}

/// Decode a row value with bincode.
pub fn decode_row<T: DeserializeOwned>(raw: &[u8]) -> MasterResult<T> {
    bincode::deserialize(raw).map_err(|e| MasterError::Catalog(e.to_string()))
}

/// The checkpoint row: where journal replay must resume after loading the
/// most recent snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Offset of the first journal entry not reflected in the snapshot.
    pub start_offset: u64,
}

/// Read the checkpoint row, defaulting to offset 0 when none was recorded.
pub fn read_checkpoint(catalog: &dyn Catalog) -> MasterResult<Checkpoint> {
    match catalog.get(CHECKPOINT_KEY)? {
        Some(raw) => decode_row(&raw),
        None => Ok(Checkpoint::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_round_trip() {
        let catalog = MemoryCatalog::new();
        catalog.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(catalog.get(b"k").unwrap().unwrap(), b"v");
        assert!(catalog.get(b"missing").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix_is_bounded() {
        let catalog = MemoryCatalog::new();
        catalog.put(cell_key("s", 1), b"a".to_vec()).unwrap();
        catalog.put(cell_key("s", 2), b"b".to_vec()).unwrap();
        catalog.put(cell_key("t", 1), b"c".to_vec()).unwrap();

        let rows = catalog.scan_prefix(&cell_prefix("s")).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_write_batch_applies_all_ops() {
        let catalog = MemoryCatalog::new();
        catalog.put(b"old".to_vec(), b"x".to_vec()).unwrap();
        catalog
            .write_batch(vec![
                BatchOp::Put {
                    key: b"new".to_vec(),
                    value: b"y".to_vec(),
                },
                BatchOp::Delete {
                    key: b"old".to_vec(),
                },
            ])
            .unwrap();
        assert!(catalog.get(b"old").unwrap().is_none());
        assert_eq!(catalog.get(b"new").unwrap().unwrap(), b"y");
    }

    #[test]
    fn test_chunk_ids_are_monotonic() {
        let catalog = MemoryCatalog::new();
        let a = catalog.allocate_chunk_id().unwrap();
        let b = catalog.allocate_chunk_id().unwrap();
        let c = catalog.allocate_chunk_id().unwrap();
        assert_eq!(a, 1);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_checkpoint_defaults_to_zero() {
        let catalog = MemoryCatalog::new();
        assert_eq!(read_checkpoint(&catalog).unwrap().start_offset, 0);

        catalog
            .put(
                CHECKPOINT_KEY.to_vec(),
                encode_row(&Checkpoint { start_offset: 42 }).unwrap(),
            )
            .unwrap();
        assert_eq!(read_checkpoint(&catalog).unwrap().start_offset, 42);
    }

    #[test]
    fn test_cell_keys_sort_by_id() {
        // Negative ids (the meta sentinel) map to the top of the u64 range,
        // sorting after every normal cell; scans still see all of them.
        let catalog = MemoryCatalog::new();
        catalog.put(cell_key("s", -1), b"meta".to_vec()).unwrap();
        catalog.put(cell_key("s", 0), b"a".to_vec()).unwrap();
        let rows = catalog.scan_prefix(&cell_prefix("s")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, b"a");
        assert_eq!(rows[1].1, b"meta");
    }
}
