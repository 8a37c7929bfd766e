//! RPC surface of the master: translates [`FileManager`] results into wire
//! replies and statuses.

use std::sync::Arc;

use async_trait::async_trait;
use sheetfs_proto::{
    Cell, CreateSheetReply, CreateSheetRequest, DeleteSheetReply, DeleteSheetRequest,
    ListSheetsReply, ListSheetsRequest, MasterService, OpenSheetReply, OpenSheetRequest,
    ReadCellReply, ReadCellRequest, ReadSheetReply, ReadSheetRequest, RecycleSheetReply,
    RecycleSheetRequest, RegisterDataNodeReply, RegisterDataNodeRequest, ResumeSheetReply,
    ResumeSheetRequest, RpcResult, Status, WriteCellReply, WriteCellRequest,
};
use tracing::{error, info};

use crate::alloc::DataNodeAllocator;
use crate::error::MasterError;
use crate::filemgr::FileManager;

/// The master's RPC server.
pub struct MasterServer {
    filemgr: Arc<FileManager>,
    alloc: Arc<DataNodeAllocator>,
}

impl MasterServer {
    /// Wrap a file manager and allocator into a servable RPC surface.
    pub fn new(filemgr: Arc<FileManager>, alloc: Arc<DataNodeAllocator>) -> Self {
        Self { filemgr, alloc }
    }

    fn fail(&self, op: &str, err: &MasterError) -> Status {
        let status = err.status();
        error!(op, error = %err, %status, "master request failed");
        status
    }
}

#[async_trait]
impl MasterService for MasterServer {
    async fn register_data_node(
        &self,
        req: RegisterDataNodeRequest,
    ) -> RpcResult<RegisterDataNodeReply> {
        info!(addr = %req.addr, "datanode registered");
        self.alloc.register(&req.addr);
        Ok(RegisterDataNodeReply { status: Status::Ok })
    }

    async fn create_sheet(&self, req: CreateSheetRequest) -> RpcResult<CreateSheetReply> {
        match self.filemgr.create_sheet(&req.filename).await {
            Ok(fd) => Ok(CreateSheetReply {
                status: Status::Ok,
                fd,
            }),
            Err(e) => Ok(CreateSheetReply {
                status: self.fail("create_sheet", &e),
                fd: 0,
            }),
        }
    }

    async fn open_sheet(&self, req: OpenSheetRequest) -> RpcResult<OpenSheetReply> {
        match self.filemgr.open_sheet(&req.filename).await {
            Ok(fd) => Ok(OpenSheetReply {
                status: Status::Ok,
                fd,
            }),
            Err(e) => Ok(OpenSheetReply {
                status: self.fail("open_sheet", &e),
                fd: 0,
            }),
        }
    }

    async fn delete_sheet(&self, req: DeleteSheetRequest) -> RpcResult<DeleteSheetReply> {
        match self.filemgr.delete_sheet(&req.filename).await {
            Ok(()) => Ok(DeleteSheetReply { status: Status::Ok }),
            Err(e) => Ok(DeleteSheetReply {
                status: self.fail("delete_sheet", &e),
            }),
        }
    }

    async fn read_sheet(&self, req: ReadSheetRequest) -> RpcResult<ReadSheetReply> {
        match self.filemgr.read_sheet(req.fd).await {
            Ok(chunks) => Ok(ReadSheetReply {
                status: Status::Ok,
                chunks,
            }),
            Err(e) => Ok(ReadSheetReply {
                status: self.fail("read_sheet", &e),
                chunks: Vec::new(),
            }),
        }
    }

    async fn read_cell(&self, req: ReadCellRequest) -> RpcResult<ReadCellReply> {
        match self.filemgr.read_cell(req.fd, req.row, req.col).await {
            Ok((cell, chunk)) => Ok(ReadCellReply {
                status: Status::Ok,
                cell: Some(Cell {
                    chunk,
                    offset: cell.offset,
                    size: cell.size,
                }),
            }),
            Err(e) => Ok(ReadCellReply {
                status: self.fail("read_cell", &e),
                cell: None,
            }),
        }
    }

    async fn write_cell(&self, req: WriteCellRequest) -> RpcResult<WriteCellReply> {
        match self.filemgr.write_cell(req.fd, req.row, req.col).await {
            Ok((cell, chunk)) => Ok(WriteCellReply {
                status: Status::Ok,
                cell: Some(Cell {
                    chunk,
                    offset: cell.offset,
                    size: cell.size,
                }),
            }),
            Err(e) => Ok(WriteCellReply {
                status: self.fail("write_cell", &e),
                cell: None,
            }),
        }
    }

    async fn recycle_sheet(&self, req: RecycleSheetRequest) -> RpcResult<RecycleSheetReply> {
        match self.filemgr.recycle_sheet(&req.filename).await {
            Ok(()) => Ok(RecycleSheetReply { status: Status::Ok }),
            Err(e) => Ok(RecycleSheetReply {
                status: self.fail("recycle_sheet", &e),
            }),
        }
    }

    async fn resume_sheet(&self, req: ResumeSheetRequest) -> RpcResult<ResumeSheetReply> {
        match self.filemgr.resume_sheet(&req.filename).await {
            Ok(()) => Ok(ResumeSheetReply { status: Status::Ok }),
            Err(e) => Ok(ResumeSheetReply {
                status: self.fail("resume_sheet", &e),
            }),
        }
    }

    async fn list_sheets(&self, _req: ListSheetsRequest) -> RpcResult<ListSheetsReply> {
        Ok(ListSheetsReply {
            status: Status::Ok,
            sheets: self.filemgr.list_sheets().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;

    fn server() -> MasterServer {
        let alloc = Arc::new(DataNodeAllocator::new());
        let fm = FileManager::load(Arc::new(MemoryCatalog::new()), alloc.clone(), None).unwrap();
        MasterServer::new(Arc::new(fm), alloc)
    }

    #[tokio::test]
    async fn test_create_and_duplicate_status() {
        let server = server();
        let reply = server
            .create_sheet(CreateSheetRequest {
                filename: "s".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Ok);

        let reply = server
            .create_sheet(CreateSheetRequest {
                filename: "s".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Exist);
    }

    #[tokio::test]
    async fn test_write_without_datanode_is_unavailable() {
        let server = server();
        let fd = server
            .create_sheet(CreateSheetRequest {
                filename: "s".into(),
            })
            .await
            .unwrap()
            .fd;
        let reply = server
            .write_cell(WriteCellRequest { fd, row: 0, col: 0 })
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Unavailable);
        assert!(reply.cell.is_none());
    }

    #[tokio::test]
    async fn test_register_then_write_round_trip() {
        let server = server();
        server
            .register_data_node(RegisterDataNodeRequest {
                addr: "dn-0:9000".into(),
            })
            .await
            .unwrap();
        let fd = server
            .create_sheet(CreateSheetRequest {
                filename: "s".into(),
            })
            .await
            .unwrap()
            .fd;

        let write = server
            .write_cell(WriteCellRequest { fd, row: 0, col: 0 })
            .await
            .unwrap();
        assert_eq!(write.status, Status::Ok);
        let descriptor = write.cell.unwrap();
        assert_eq!(descriptor.chunk.version, 1);
        assert_eq!(descriptor.chunk.datanode, "dn-0:9000");

        let read = server
            .read_cell(ReadCellRequest { fd, row: 0, col: 0 })
            .await
            .unwrap();
        assert_eq!(read.status, Status::Ok);
        assert_eq!(read.cell.unwrap().chunk.version, 1);
    }

    #[tokio::test]
    async fn test_unwritten_cell_is_invalid() {
        let server = server();
        let fd = server
            .create_sheet(CreateSheetRequest {
                filename: "s".into(),
            })
            .await
            .unwrap()
            .fd;
        let reply = server
            .read_cell(ReadCellRequest { fd, row: 8, col: 8 })
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Invalid);
    }

    #[tokio::test]
    async fn test_bad_fd_is_not_found() {
        let server = server();
        let reply = server.read_sheet(ReadSheetRequest { fd: 404 }).await.unwrap();
        assert_eq!(reply.status, Status::NotFound);
    }
}
