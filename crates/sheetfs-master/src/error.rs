//! Error types for the master metadata engine.

use sheetfs_journal::JournalError;
use sheetfs_proto::Status;
use thiserror::Error;

/// Result type alias for master operations.
pub type MasterResult<T> = Result<T, MasterError>;

/// Error variants for master operations.
#[derive(Debug, Error)]
pub enum MasterError {
    /// The named sheet does not exist or is recycled.
    #[error("sheet not found: {filename}")]
    FileNotFound {
        /// The sheet name that failed to resolve.
        filename: String,
    },

    /// A sheet with this name already exists, possibly recycled.
    #[error("sheet already exists: {filename}")]
    FileExists {
        /// The conflicting sheet name.
        filename: String,
    },

    /// The sheet name is empty or contains a path separator.
    #[error("invalid sheet name: {filename:?}")]
    InvalidFileName {
        /// The rejected name.
        filename: String,
    },

    /// The fd is not in the fd table.
    #[error("fd not found: {fd}")]
    FdNotFound {
        /// The unknown fd.
        fd: u64,
    },

    /// The cell at `(row, col)` was never written.
    #[error("cell not found at ({row}, {col})")]
    CellNotFound {
        /// Row coordinate of the lookup.
        row: u32,
        /// Column coordinate of the lookup.
        col: u32,
    },

    /// No datanode is registered with the allocator.
    #[error("no datanode registered")]
    NoDataNode,

    /// The catalog rejected an operation.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// The in-memory index violated one of its own invariants.
    #[error("index corrupt: {reason}")]
    IndexCorrupt {
        /// Description of the violated invariant.
        reason: String,
    },

    /// The journal bus failed.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// The election coordinator failed or the session was lost.
    #[error("election error: {0}")]
    Election(String),

    /// A journal entry violated the replay invariants.
    #[error("invalid journal entry: {reason}")]
    InvalidJournalEntry {
        /// Why the entry was rejected.
        reason: String,
    },
}

impl MasterError {
    /// Translate this error into the wire status reported to clients.
    pub fn status(&self) -> Status {
        match self {
            MasterError::FileExists { .. } => Status::Exist,
            MasterError::CellNotFound { .. } => Status::Invalid,
            MasterError::InvalidFileName { .. } => Status::Invalid,
            MasterError::FileNotFound { .. } => Status::NotFound,
            MasterError::FdNotFound { .. } => Status::NotFound,
            MasterError::NoDataNode => Status::Unavailable,
            _ => Status::Unavailable,
        }
    }
}
