//! RPC surface of a datanode.
//!
//! The write path is journal-first: a write that passes the version check
//! is committed to the group's journal topic before any disk mutation, and
//! the commit is retried until the bus accepts it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sheetfs_journal::JournalWriter;
use sheetfs_proto::{
    DataNodeService, DeleteChunkReply, DeleteChunkRequest, ReadChunkReply, ReadChunkRequest,
    RpcResult, Status, WriteChunkReply, WriteChunkRequest,
};
use tracing::{error, warn};

use crate::error::DataNodeError;
use crate::store::ChunkStore;

/// The datanode's RPC server.
pub struct DataNodeServer {
    store: Arc<ChunkStore>,
    journal: Option<Arc<dyn JournalWriter>>,
}

impl DataNodeServer {
    /// Wrap a chunk store and journal writer into a servable RPC surface.
    pub fn new(store: Arc<ChunkStore>, journal: Option<Arc<dyn JournalWriter>>) -> Self {
        Self { store, journal }
    }

    fn fail(&self, op: &str, err: &DataNodeError) -> Status {
        let status = err.status();
        if status == Status::WrongVersion {
            // Losing a version race is expected under contention; clients
            // spin on it.
            warn!(op, error = %err, "version arbitration rejected request");
        } else {
            error!(op, error = %err, %status, "datanode request failed");
        }
        status
    }

    async fn commit_journal(&self, raw: &[u8]) {
        let writer = match &self.journal {
            Some(writer) => writer,
            None => return,
        };
        let mut attempt: u32 = 0;
        loop {
            match writer.commit(raw).await {
                Ok(_) => return,
                Err(e) => {
                    attempt += 1;
                    warn!(error = %e, attempt, "datanode journal commit failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

#[async_trait]
impl DataNodeService for DataNodeServer {
    async fn read_chunk(&self, req: ReadChunkRequest) -> RpcResult<ReadChunkReply> {
        match self.store.read(req.id, req.offset, req.size, req.version) {
            Ok(data) => Ok(ReadChunkReply {
                status: Status::Ok,
                data,
            }),
            Err(e) => Ok(ReadChunkReply {
                status: self.fail("read_chunk", &e),
                data: Vec::new(),
            }),
        }
    }

    async fn write_chunk(&self, req: WriteChunkRequest) -> RpcResult<WriteChunkReply> {
        let prepared =
            match self
                .store
                .prepare_write(req.id, req.offset, req.version, req.padding, &req.data)
            {
                Ok(prepared) => prepared,
                Err(e) => {
                    return Ok(WriteChunkReply {
                        status: self.fail("write_chunk", &e),
                    })
                }
            };
        // Accepted: the journal entry must be durable before the disk
        // mutation, so a crashed primary never holds data its secondaries
        // cannot reconstruct.
        self.commit_journal(&prepared.journal_entry().encode()).await;
        match self.store.commit_write(&prepared) {
            Ok(()) => Ok(WriteChunkReply { status: Status::Ok }),
            Err(e) => Ok(WriteChunkReply {
                status: self.fail("write_chunk", &e),
            }),
        }
    }

    async fn delete_chunk(&self, req: DeleteChunkRequest) -> RpcResult<DeleteChunkReply> {
        match self.store.delete(req.id) {
            Ok(()) => Ok(DeleteChunkReply { status: Status::Ok }),
            Err(e) => Ok(DeleteChunkReply {
                status: self.fail("delete_chunk", &e),
            }),
        }
    }
}
