//! Versioned chunk files on local disk.
//!
//! Each chunk is a flat file `chunk_<id>` in the data directory: cell
//! payloads live in `[0, BYTES_PER_CHUNK)` and the chunk's current version
//! sits right behind them as a big-endian word. Writes are slot-granular
//! and padded, so a chunk file always has its full size once created.
//!
//! Write acceptance is the version protocol: a missing file accepts only
//! version 1, an existing file accepts only its persisted version plus one.
//! There is no per-chunk lock; the version check is what serializes writers
//! on a single chunk while distinct chunks proceed in parallel.
//!
//! A write is split into [`ChunkStore::prepare_write`] (existence and
//! version check, region assembly) and [`ChunkStore::commit_write`] (disk
//! mutation) so the server can commit the journal entry in between.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use sheetfs_proto::{BYTES_PER_CHUNK, MAX_BYTES_PER_CELL, VERSION_OFFSET};
use tracing::{debug, warn};

use crate::error::{DataNodeError, DataNodeResult};
use crate::journal::JournalEntry;

/// A write that passed the version check and is ready to journal and
/// persist.
pub struct PreparedWrite {
    /// Target chunk.
    pub chunk_id: u64,
    /// Version the write installs.
    pub version: u64,
    /// Byte offset of the padded region inside the payload area.
    pub offset: u64,
    /// The padded region exactly as it will land on disk.
    pub bytes: Vec<u8>,
    creates_file: bool,
}

impl PreparedWrite {
    /// The journal record for this write.
    pub fn journal_entry(&self) -> JournalEntry {
        JournalEntry::new(self.version, self.chunk_id, self.offset, self.bytes.clone())
    }
}

/// Chunk file storage rooted at one data directory.
pub struct ChunkStore {
    data_dir: PathBuf,
}

impl ChunkStore {
    /// Open a store, creating the data directory when missing.
    pub fn open(data_dir: impl AsRef<Path>) -> DataNodeResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| DataNodeError::Unavailable(e.to_string()))?;
        Ok(Self { data_dir })
    }

    fn chunk_path(&self, id: u64) -> PathBuf {
        self.data_dir.join(format!("chunk_{}", id))
    }

    fn read_version(file: &File) -> DataNodeResult<u64> {
        let mut buf = [0u8; 8];
        match file.read_exact_at(&mut buf, VERSION_OFFSET) {
            Ok(()) => Ok(u64::from_be_bytes(buf)),
            // A concurrent first write has created the file but not stamped
            // the version word yet; the chunk is effectively at version 0
            // and the version check sends the caller into its retry loop.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(DataNodeError::Io(e)),
        }
    }

    fn write_version(file: &File, version: u64) -> DataNodeResult<()> {
        file.write_all_at(&version.to_be_bytes(), VERSION_OFFSET)?;
        Ok(())
    }

    /// The slot a write at `offset` pads out to: one cell slot normally,
    /// the whole payload area for a meta-sized payload.
    fn slot_len(data_len: usize) -> u64 {
        if data_len as u64 > MAX_BYTES_PER_CELL {
            BYTES_PER_CHUNK
        } else {
            MAX_BYTES_PER_CELL
        }
    }

    /// Run the existence and version checks for a write and assemble the
    /// padded region. No disk mutation happens here.
    pub fn prepare_write(
        &self,
        id: u64,
        offset: u64,
        version: u64,
        padding: u8,
        data: &[u8],
    ) -> DataNodeResult<PreparedWrite> {
        let slot = Self::slot_len(data.len());
        if data.len() as u64 > slot || offset + slot > BYTES_PER_CHUNK {
            return Err(DataNodeError::BadRequest {
                reason: format!(
                    "write of {} bytes at offset {} does not fit a chunk",
                    data.len(),
                    offset
                ),
            });
        }
        match OpenOptions::new().read(true).open(self.chunk_path(id)) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // The master hands version 1 to the first write of a chunk.
                if version != 1 {
                    return Err(DataNodeError::WrongVersion {
                        current: 0,
                        requested: version,
                    });
                }
                let mut bytes = vec![padding; BYTES_PER_CHUNK as usize];
                bytes[offset as usize..offset as usize + data.len()].copy_from_slice(data);
                Ok(PreparedWrite {
                    chunk_id: id,
                    version,
                    offset: 0,
                    bytes,
                    creates_file: true,
                })
            }
            Err(e) => Err(DataNodeError::Unavailable(e.to_string())),
            Ok(file) => {
                let current = Self::read_version(&file)?;
                if version != current + 1 {
                    return Err(DataNodeError::WrongVersion {
                        current,
                        requested: version,
                    });
                }
                let mut bytes = vec![padding; slot as usize];
                bytes[..data.len()].copy_from_slice(data);
                Ok(PreparedWrite {
                    chunk_id: id,
                    version,
                    offset,
                    bytes,
                    creates_file: false,
                })
            }
        }
    }

    /// Persist a prepared write: region first, version word last.
    pub fn commit_write(&self, prepared: &PreparedWrite) -> DataNodeResult<()> {
        let path = self.chunk_path(prepared.chunk_id);
        let file = if prepared.creates_file {
            File::create(&path).map_err(|e| DataNodeError::Unavailable(e.to_string()))?
        } else {
            OpenOptions::new().read(true).write(true).open(&path)?
        };
        file.write_all_at(&prepared.bytes, prepared.offset)?;
        Self::write_version(&file, prepared.version)?;
        debug!(
            chunk = prepared.chunk_id,
            version = prepared.version,
            offset = prepared.offset,
            len = prepared.bytes.len(),
            "chunk write persisted"
        );
        Ok(())
    }

    /// Read `[offset, offset + size)` out of a chunk.
    ///
    /// The caller's version must be at least the persisted one; a newer
    /// on-disk version means the caller is racing a writer and must retry.
    pub fn read(&self, id: u64, offset: u64, size: u64, version: u64) -> DataNodeResult<Vec<u8>> {
        let file = match OpenOptions::new().read(true).open(self.chunk_path(id)) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DataNodeError::ChunkNotFound { id })
            }
            Err(e) => return Err(DataNodeError::Io(e)),
            Ok(file) => file,
        };
        let current = Self::read_version(&file)?;
        if current > version {
            return Err(DataNodeError::WrongVersion {
                current,
                requested: version,
            });
        }
        let mut data = vec![0u8; size as usize];
        file.read_exact_at(&mut data, offset)?;
        Ok(data)
    }

    /// Remove a chunk file. Idempotent: removing a missing chunk succeeds.
    pub fn delete(&self, id: u64) -> DataNodeResult<()> {
        if let Err(e) = std::fs::remove_file(self.chunk_path(id)) {
            if e.kind() != ErrorKind::NotFound {
                warn!(chunk = id, error = %e, "chunk delete failed");
            }
        }
        Ok(())
    }

    /// The persisted version of a chunk, `None` when the file is missing.
    pub fn version(&self, id: u64) -> DataNodeResult<Option<u64>> {
        match OpenOptions::new().read(true).open(self.chunk_path(id)) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DataNodeError::Io(e)),
            Ok(file) => Ok(Some(Self::read_version(&file)?)),
        }
    }

    /// Apply one replicated journal entry.
    ///
    /// Reads the resident region and compares checksums: on mismatch the
    /// journal's bytes overwrite it, then the version word is stamped.
    /// Re-applying an entry is a no-op on content, and a replica that
    /// missed a write converges on the next replay.
    pub fn replay(&self, entry: &JournalEntry) -> DataNodeResult<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.chunk_path(entry.chunk_id))
            .map_err(|e| DataNodeError::Unavailable(e.to_string()))?;
        if file.metadata()?.len() < BYTES_PER_CHUNK + 8 {
            file.set_len(BYTES_PER_CHUNK + 8)?;
        }
        let mut existing = vec![0u8; entry.size as usize];
        file.read_exact_at(&mut existing, entry.offset)?;
        if crate::journal::checksum(&existing) != entry.crc32 {
            file.write_all_at(&entry.data, entry.offset)?;
        }
        Self::write_version(&file, entry.version)?;
        Ok(())
    }
}
