//! Error types for the datanode chunk engine.

use sheetfs_journal::JournalError;
use sheetfs_proto::Status;
use thiserror::Error;

/// Result type alias for datanode operations.
pub type DataNodeResult<T> = Result<T, DataNodeError>;

/// Error variants for datanode operations.
#[derive(Debug, Error)]
pub enum DataNodeError {
    /// The write or read carried a version the chunk cannot accept.
    #[error("wrong version: disk has {current}, request carried {requested}")]
    WrongVersion {
        /// Version currently persisted for the chunk (0 when the file does
        /// not exist).
        current: u64,
        /// Version the request carried.
        requested: u64,
    },

    /// The chunk file does not exist.
    #[error("chunk not found: {id}")]
    ChunkNotFound {
        /// The missing chunk id.
        id: u64,
    },

    /// The request geometry does not fit a chunk.
    #[error("bad request: {reason}")]
    BadRequest {
        /// Why the request was rejected.
        reason: String,
    },

    /// A new chunk file could not be created.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Payload I/O failed after the existence check.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A journal entry could not be decoded.
    #[error("bad journal entry: {reason}")]
    BadEntry {
        /// Why the entry was rejected.
        reason: String,
    },

    /// The journal bus failed.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// The election coordinator failed or the session was lost.
    #[error("election error: {0}")]
    Election(String),

    /// Registration with the master failed.
    #[error("master registration failed: {0}")]
    Registration(String),
}

impl DataNodeError {
    /// Translate this error into the wire status reported to clients.
    pub fn status(&self) -> Status {
        match self {
            DataNodeError::WrongVersion { .. } => Status::WrongVersion,
            DataNodeError::ChunkNotFound { .. } => Status::NotFound,
            DataNodeError::Io(_) => Status::NotFound,
            DataNodeError::BadRequest { .. } => Status::Invalid,
            _ => Status::Unavailable,
        }
    }
}
