//! Error types surfaced by the client library.

use sheetfs_proto::{RpcError, Status};
use thiserror::Error;

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Error variants surfaced by the client library.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The sheet name is empty or contains a path separator.
    #[error("invalid sheet name")]
    InvalidName,

    /// A sheet with this name already exists.
    #[error("sheet already exists")]
    Exists,

    /// The sheet (or chunk) does not exist.
    #[error("not found")]
    NotFound,

    /// The cell was never written.
    #[error("cell not found")]
    CellNotFound,

    /// A server replied with a status the protocol does not allow here.
    #[error("unexpected status: {0}")]
    UnexpectedStatus(Status),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The peer stayed unreachable through every rediscovery attempt.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        ClientError::Transport(e.to_string())
    }
}
