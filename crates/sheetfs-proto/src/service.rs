//! Service traits implemented by servers and consumed by clients.
//!
//! The actual transport is pluggable: a production deployment dials TCP
//! connections, the test harness wires calls in-process. Both sides only
//! ever see these traits.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::message::*;

/// Transport-level failure. Application-level outcomes travel as
/// [`Status`](crate::message::Status) values inside replies.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The peer is unreachable or the connection broke mid-call.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A message could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for RPC calls.
pub type RpcResult<T> = Result<T, RpcError>;

/// The master's RPC surface.
#[async_trait]
pub trait MasterService: Send + Sync {
    /// Register a datanode group's address with the allocator.
    async fn register_data_node(
        &self,
        req: RegisterDataNodeRequest,
    ) -> RpcResult<RegisterDataNodeReply>;

    /// Create a sheet and open it immediately.
    async fn create_sheet(&self, req: CreateSheetRequest) -> RpcResult<CreateSheetReply>;

    /// Open an existing sheet.
    async fn open_sheet(&self, req: OpenSheetRequest) -> RpcResult<OpenSheetReply>;

    /// Soft-delete a sheet.
    async fn delete_sheet(&self, req: DeleteSheetRequest) -> RpcResult<DeleteSheetReply>;

    /// List all chunks of an opened sheet.
    async fn read_sheet(&self, req: ReadSheetRequest) -> RpcResult<ReadSheetReply>;

    /// Look up a cell descriptor for reading.
    async fn read_cell(&self, req: ReadCellRequest) -> RpcResult<ReadCellReply>;

    /// Reserve a cell descriptor for writing, creating the cell if needed.
    async fn write_cell(&self, req: WriteCellRequest) -> RpcResult<WriteCellReply>;

    /// Mark a sheet as recycled.
    async fn recycle_sheet(&self, req: RecycleSheetRequest) -> RpcResult<RecycleSheetReply>;

    /// Clear a sheet's recycled flag.
    async fn resume_sheet(&self, req: ResumeSheetRequest) -> RpcResult<ResumeSheetReply>;

    /// List every sheet in the directory.
    async fn list_sheets(&self, req: ListSheetsRequest) -> RpcResult<ListSheetsReply>;
}

/// A datanode's RPC surface.
#[async_trait]
pub trait DataNodeService: Send + Sync {
    /// Read a byte range out of a chunk.
    async fn read_chunk(&self, req: ReadChunkRequest) -> RpcResult<ReadChunkReply>;

    /// Write a cell's bytes into a chunk.
    async fn write_chunk(&self, req: WriteChunkRequest) -> RpcResult<WriteChunkReply>;

    /// Remove a chunk file.
    async fn delete_chunk(&self, req: DeleteChunkRequest) -> RpcResult<DeleteChunkReply>;
}

/// Resolves addresses to live service stubs. Dialing is out of scope for
/// the core; deployments plug in their transport here.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the master at `addr`.
    async fn connect_master(&self, addr: &str) -> RpcResult<Arc<dyn MasterService>>;

    /// Connect to the datanode group at `addr`.
    async fn connect_datanode(&self, addr: &str) -> RpcResult<Arc<dyn DataNodeService>>;
}
