//! The namespace directory and fd table.
//!
//! `FileManager` is the master's dispatch layer. It owns the single-level
//! directory mapping sheet names to [`SheetFile`]s and the Unix-alike fd
//! table: opening a sheet yields an fd, several fds may alias one sheet, and
//! the fd namespace is global rather than per-client. Fds are monotonic from
//! zero and never reused.
//!
//! Locking is two-level: the manager's own lock covers directory and fd
//! lookups, while each sheet serializes its own index behind its internal
//! lock. Everything returned to callers is a snapshot, safe to read without
//! holding anything.
//!
//! Every mutation is committed to the master journal before the reply
//! becomes visible to the client. Journal commits are retried indefinitely;
//! the log bus is assumed to be highly available.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sheetfs_journal::JournalWriter;
use sheetfs_proto::{self as proto};
use tokio::sync::RwLock;
use tracing::warn;

use crate::alloc::DataNodeAllocator;
use crate::catalog::{self, BatchOp, Catalog, Checkpoint, CHECKPOINT_KEY};
use crate::cell::Cell;
use crate::chunk::ChunkRow;
use crate::error::{MasterError, MasterResult};
use crate::journal::{MasterEntry, TargetState};
use crate::sheetfile::SheetFile;

/// A directory entry: one sheet's name, catalog location and soft-delete
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    /// Sheet name.
    pub file_name: String,
    /// Catalog prefix of the sheet's cell table.
    pub cell_table_name: String,
    /// True when the sheet is soft-deleted. Recycled names still block
    /// creation until the background reaper hard-deletes them.
    pub recycled: bool,
    /// When the sheet was recycled, microseconds since the Unix epoch.
    pub recycled_at: Option<u64>,
}

impl MapEntry {
    /// Fresh, non-recycled entry for `filename`.
    pub fn new(filename: &str) -> Self {
        Self {
            file_name: filename.to_string(),
            cell_table_name: String::from_utf8_lossy(&catalog::cell_prefix(filename)).into_owned(),
            recycled: false,
            recycled_at: None,
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn valid_filename(filename: &str) -> bool {
    !filename.is_empty() && !filename.contains('/') && !filename.contains('\\')
}

struct Directory {
    /// All directory entries, loaded in full at startup.
    entries: HashMap<String, MapEntry>,
    /// Sheets currently resident in memory, loaded on demand.
    opened: HashMap<String, Arc<SheetFile>>,
    /// Maps fd to the name of the sheet it aliases.
    fds: HashMap<u64, String>,
    next_fd: u64,
}

/// The master's namespace directory, fd table and journal front-end.
pub struct FileManager {
    state: RwLock<Directory>,
    catalog: Arc<dyn Catalog>,
    alloc: Arc<DataNodeAllocator>,
    journal: Option<Arc<dyn JournalWriter>>,
    /// Offset the next checkpoint records: everything before it is already
    /// reflected in memory.
    replay_offset: AtomicU64,
}

impl FileManager {
    /// Load the directory from the catalog. Opened sheets and fds start
    /// empty; sheets are pulled in on demand.
    pub fn load(
        catalog: Arc<dyn Catalog>,
        alloc: Arc<DataNodeAllocator>,
        journal: Option<Arc<dyn JournalWriter>>,
    ) -> MasterResult<Self> {
        let mut entries = HashMap::new();
        for (_key, raw) in catalog.scan_prefix(&catalog::map_entry_prefix())? {
            let entry: MapEntry = catalog::decode_row(&raw)?;
            entries.insert(entry.file_name.clone(), entry);
        }
        let start_offset = catalog::read_checkpoint(catalog.as_ref())?.start_offset;
        Ok(Self {
            state: RwLock::new(Directory {
                entries,
                opened: HashMap::new(),
                fds: HashMap::new(),
                next_fd: 0,
            }),
            catalog,
            alloc,
            journal,
            replay_offset: AtomicU64::new(start_offset),
        })
    }

    /// Commit a journal entry, retrying until the bus accepts it.
    async fn commit_entry(&self, entry: &MasterEntry) -> MasterResult<()> {
        let writer = match &self.journal {
            Some(writer) => writer,
            None => return Ok(()),
        };
        let raw = entry.encode()?;
        let mut attempt: u32 = 0;
        loop {
            match writer.commit(&raw).await {
                Ok(offset) => {
                    self.replay_offset.fetch_max(offset + 1, Ordering::SeqCst);
                    return Ok(());
                }
                Err(e) => {
                    attempt += 1;
                    warn!(error = %e, attempt, "master journal commit failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn alloc_fd(state: &mut Directory, filename: &str) -> u64 {
        let fd = state.next_fd;
        state.next_fd += 1;
        state.fds.insert(fd, filename.to_string());
        fd
    }

    async fn file_by_fd(&self, fd: u64) -> MasterResult<Arc<SheetFile>> {
        let state = self.state.read().await;
        let filename = state.fds.get(&fd).ok_or(MasterError::FdNotFound { fd })?;
        state
            .opened
            .get(filename)
            .cloned()
            .ok_or(MasterError::FdNotFound { fd })
    }

    /// Create a sheet and open it immediately, returning its fd.
    ///
    /// The name is rejected while any sheet — recycled or not — carries it.
    pub async fn create_sheet(&self, filename: &str) -> MasterResult<u64> {
        if !valid_filename(filename) {
            return Err(MasterError::InvalidFileName {
                filename: filename.to_string(),
            });
        }
        let mut state = self.state.write().await;
        if state.entries.contains_key(filename) {
            return Err(MasterError::FileExists {
                filename: filename.to_string(),
            });
        }
        let entry = MapEntry::new(filename);
        self.commit_entry(&MasterEntry::for_map_entry(entry.clone()))
            .await?;
        state.entries.insert(filename.to_string(), entry);
        state
            .opened
            .insert(filename.to_string(), Arc::new(SheetFile::new(filename)));
        Ok(Self::alloc_fd(&mut state, filename))
    }

    /// Open an existing sheet, loading it from the catalog on demand.
    pub async fn open_sheet(&self, filename: &str) -> MasterResult<u64> {
        let mut state = self.state.write().await;
        match state.entries.get(filename) {
            Some(entry) if !entry.recycled => {}
            _ => {
                return Err(MasterError::FileNotFound {
                    filename: filename.to_string(),
                })
            }
        }
        if !state.opened.contains_key(filename) {
            let sheet = SheetFile::load(self.catalog.as_ref(), filename)?;
            state.opened.insert(filename.to_string(), Arc::new(sheet));
        }
        Ok(Self::alloc_fd(&mut state, filename))
    }

    async fn set_recycled(&self, filename: &str, recycled: bool) -> MasterResult<bool> {
        let mut state = self.state.write().await;
        let entry = match state.entries.get(filename) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let mut updated = entry.clone();
        updated.recycled = recycled;
        updated.recycled_at = recycled.then(now_micros);
        self.commit_entry(&MasterEntry::for_map_entry(updated.clone()))
            .await?;
        state.entries.insert(filename.to_string(), updated);
        Ok(true)
    }

    /// Mark a sheet as recycled. Open fds keep working; later opens and
    /// creates of the name fail. Unknown names are a no-op.
    pub async fn recycle_sheet(&self, filename: &str) -> MasterResult<()> {
        self.set_recycled(filename, true).await.map(|_| ())
    }

    /// Clear a sheet's recycled flag. Unknown names are a no-op.
    pub async fn resume_sheet(&self, filename: &str) -> MasterResult<()> {
        self.set_recycled(filename, false).await.map(|_| ())
    }

    /// Soft-delete a sheet by name. Unlike [`recycle_sheet`] this reports
    /// unknown names.
    ///
    /// [`recycle_sheet`]: FileManager::recycle_sheet
    pub async fn delete_sheet(&self, filename: &str) -> MasterResult<()> {
        if self.set_recycled(filename, true).await? {
            Ok(())
        } else {
            Err(MasterError::FileNotFound {
                filename: filename.to_string(),
            })
        }
    }

    /// All chunks of the sheet aliased by `fd`.
    pub async fn read_sheet(&self, fd: u64) -> MasterResult<Vec<proto::Chunk>> {
        let file = self.file_by_fd(fd).await?;
        Ok(file.all_chunks())
    }

    /// Cell descriptor for a read of `(row, col)`.
    pub async fn read_cell(&self, fd: u64, row: u32, col: u32) -> MasterResult<(Cell, proto::Chunk)> {
        let file = self.file_by_fd(fd).await?;
        file.read_cell(row, col)
    }

    /// Cell descriptor for a write to `(row, col)`, creating the cell if
    /// needed. The mutation is journaled before the reply.
    pub async fn write_cell(
        &self,
        fd: u64,
        row: u32,
        col: u32,
    ) -> MasterResult<(Cell, proto::Chunk)> {
        let file = self.file_by_fd(fd).await?;
        let (cell, chunk) = file.write_cell(row, col, &self.alloc, self.catalog.as_ref())?;
        let chunk_row = ChunkRow {
            id: chunk.id,
            datanode: chunk.datanode.clone(),
            version: chunk.version,
        };
        self.commit_entry(&MasterEntry::for_mutation(cell.clone(), chunk_row))
            .await?;
        Ok((cell, chunk))
    }

    /// One summary entry per sheet, recycled sheets included.
    pub async fn list_sheets(&self) -> Vec<proto::SheetEntry> {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .map(|entry| proto::SheetEntry {
                filename: entry.file_name.clone(),
                recycled: entry.recycled,
            })
            .collect()
    }

    /// Flush the directory and every resident sheet to the catalog in one
    /// atomic batch, recording the journal offset replay must resume from.
    pub async fn persist(&self) -> MasterResult<()> {
        // Capture the offset before snapshotting: a mutation that slips in
        // between is replayed on recovery, which apply is idempotent to.
        let start_offset = self.replay_offset.load(Ordering::SeqCst);
        let state = self.state.read().await;
        let mut batch = Vec::new();
        for entry in state.entries.values() {
            batch.push(BatchOp::Put {
                key: catalog::map_entry_key(&entry.file_name),
                value: catalog::encode_row(entry)?,
            });
        }
        for file in state.opened.values() {
            file.persist_ops(&mut batch)?;
        }
        batch.push(BatchOp::Put {
            key: CHECKPOINT_KEY.to_vec(),
            value: catalog::encode_row(&Checkpoint { start_offset })?,
        });
        self.catalog.write_batch(batch)
    }

    /// Record how far journal replay has progressed, for the next
    /// checkpoint.
    pub fn note_replayed(&self, next_offset: u64) {
        self.replay_offset.fetch_max(next_offset, Ordering::SeqCst);
    }

    /// Offset the next checkpoint will record.
    pub fn replay_offset(&self) -> u64 {
        self.replay_offset.load(Ordering::SeqCst)
    }

    /// Apply one replicated journal record to the in-memory state.
    ///
    /// Used by secondaries tailing the journal and during crash recovery.
    /// Invalid records — a cell without its chunk, or a mutation on a sheet
    /// with no prior directory entry — abort replay.
    pub async fn apply_entry(&self, entry: MasterEntry) -> MasterResult<()> {
        let mut state = self.state.write().await;
        if let Some(record) = &entry.map_entry {
            match record.target_state {
                TargetState::Present => {
                    state
                        .entries
                        .insert(record.entry.file_name.clone(), record.entry.clone());
                }
                TargetState::Absent => {
                    state.entries.remove(&record.entry.file_name);
                    state.opened.remove(&record.entry.file_name);
                }
            }
        }
        let (cell, chunk) = match (entry.cell, entry.chunk) {
            (None, None) => return Ok(()),
            (Some(cell), Some(chunk)) => (cell, chunk),
            _ => {
                return Err(MasterError::InvalidJournalEntry {
                    reason: "cell and chunk sections must travel together".to_string(),
                })
            }
        };
        let sheet_name = cell.cell.sheet_name.clone();
        if !state.entries.contains_key(&sheet_name) {
            return Err(MasterError::InvalidJournalEntry {
                reason: format!("mutation on sheet {} with no directory entry", sheet_name),
            });
        }
        let file = match state.opened.get(&sheet_name) {
            Some(file) => file.clone(),
            None => {
                let file = Arc::new(SheetFile::load(self.catalog.as_ref(), &sheet_name)?);
                state.opened.insert(sheet_name, file.clone());
                file
            }
        };
        file.apply_chunk(chunk.chunk, chunk.target_state == TargetState::Present);
        file.apply_cell(cell.cell, cell.target_state == TargetState::Present)
    }
}
