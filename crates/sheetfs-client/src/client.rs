//! The SheetFS client: master stub, datanode stub cache, rediscovery.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sheetfs_election::Coordinator;
use sheetfs_proto::{
    Connector, CreateSheetReply, CreateSheetRequest, DataNodeService, DeleteSheetReply,
    DeleteSheetRequest, ListSheetsRequest, MasterService, OpenSheetReply, OpenSheetRequest,
    ReadChunkReply, ReadChunkRequest, RecycleSheetRequest, ResumeSheetRequest, RpcResult,
    SheetEntry, Status, WriteChunkReply, WriteChunkRequest, REDISCOVERY_ATTEMPTS,
};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::file::File;

type BoxedReply<T> = Pin<Box<dyn Future<Output = RpcResult<T>> + Send>>;

fn valid_filename(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\')
}

struct ClientInner {
    master: tokio::sync::RwLock<Arc<dyn MasterService>>,
    /// Datanode stubs keyed by group identity, populated lazily whenever a
    /// master reply references a new group.
    datanodes: std::sync::RwLock<HashMap<String, Arc<dyn DataNodeService>>>,
    connector: Arc<dyn Connector>,
    coordinator: Arc<dyn Coordinator>,
    master_group: String,
}

/// Handle to a SheetFS deployment. Cheap to clone; clones share stubs.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Resolve the master primary through the coordinator and connect.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        coordinator: Arc<dyn Coordinator>,
        master_group: &str,
    ) -> ClientResult<Self> {
        let addr = coordinator
            .leader_addr(master_group)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let master = connector.connect_master(&addr).await?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                master: tokio::sync::RwLock::new(master),
                datanodes: std::sync::RwLock::new(HashMap::new()),
                connector,
                coordinator,
                master_group: master_group.to_string(),
            }),
        })
    }

    pub(crate) async fn master(&self) -> Arc<dyn MasterService> {
        self.inner.master.read().await.clone()
    }

    async fn rediscover_master(&self) -> ClientResult<()> {
        let addr = self
            .inner
            .coordinator
            .leader_addr(&self.inner.master_group)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let master = self.inner.connector.connect_master(&addr).await?;
        *self.inner.master.write().await = master;
        debug!(%addr, "reconnected to master primary");
        Ok(())
    }

    /// One master round-trip with bounded primary rediscovery on transport
    /// failure.
    async fn master_call<T>(
        &self,
        call: &(dyn Fn(Arc<dyn MasterService>) -> BoxedReply<T> + Sync),
    ) -> ClientResult<T> {
        let first = match call(self.master().await).await {
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };
        warn!(error = %first, "master call failed, rediscovering primary");
        let mut last = first.to_string();
        for _ in 0..REDISCOVERY_ATTEMPTS {
            if let Err(e) = self.rediscover_master().await {
                last = e.to_string();
                continue;
            }
            match call(self.master().await).await {
                Ok(reply) => return Ok(reply),
                Err(e) => last = e.to_string(),
            }
        }
        Err(ClientError::Transport(last))
    }

    /// Create a sheet and open it.
    pub async fn create(&self, name: &str) -> ClientResult<File> {
        if !valid_filename(name) {
            return Err(ClientError::InvalidName);
        }
        let req = CreateSheetRequest {
            filename: name.to_string(),
        };
        let reply = self
            .master_call(&|m: Arc<dyn MasterService>| -> BoxedReply<CreateSheetReply> {
                let req = req.clone();
                Box::pin(async move { m.create_sheet(req).await })
            })
            .await?;
        match reply.status {
            Status::Ok => Ok(File::new(reply.fd, self.clone())),
            Status::Exist => Err(ClientError::Exists),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    /// Open an existing sheet.
    pub async fn open(&self, name: &str) -> ClientResult<File> {
        if !valid_filename(name) {
            return Err(ClientError::InvalidName);
        }
        let req = OpenSheetRequest {
            filename: name.to_string(),
        };
        let reply = self
            .master_call(&|m: Arc<dyn MasterService>| -> BoxedReply<OpenSheetReply> {
                let req = req.clone();
                Box::pin(async move { m.open_sheet(req).await })
            })
            .await?;
        match reply.status {
            Status::Ok => Ok(File::new(reply.fd, self.clone())),
            Status::NotFound => Err(ClientError::NotFound),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    /// Soft-delete a sheet by name.
    pub async fn delete(&self, name: &str) -> ClientResult<()> {
        let req = DeleteSheetRequest {
            filename: name.to_string(),
        };
        let reply = self
            .master_call(&|m: Arc<dyn MasterService>| -> BoxedReply<DeleteSheetReply> {
                let req = req.clone();
                Box::pin(async move { m.delete_sheet(req).await })
            })
            .await?;
        match reply.status {
            Status::Ok => Ok(()),
            Status::NotFound => Err(ClientError::NotFound),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    /// Mark a sheet as recycled.
    pub async fn recycle(&self, name: &str) -> ClientResult<()> {
        let reply = self
            .master()
            .await
            .recycle_sheet(RecycleSheetRequest {
                filename: name.to_string(),
            })
            .await?;
        match reply.status {
            Status::Ok => Ok(()),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    /// Clear a sheet's recycled flag.
    pub async fn resume(&self, name: &str) -> ClientResult<()> {
        let reply = self
            .master()
            .await
            .resume_sheet(ResumeSheetRequest {
                filename: name.to_string(),
            })
            .await?;
        match reply.status {
            Status::Ok => Ok(()),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    /// List every sheet in the directory, recycled ones included.
    pub async fn list_sheets(&self) -> ClientResult<Vec<SheetEntry>> {
        let reply = self.master().await.list_sheets(ListSheetsRequest {}).await?;
        match reply.status {
            Status::Ok => Ok(reply.sheets),
            status => Err(ClientError::UnexpectedStatus(status)),
        }
    }

    async fn refresh_datanode(&self, group: &str) -> ClientResult<Arc<dyn DataNodeService>> {
        let addr = self
            .inner
            .coordinator
            .leader_addr(group)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let stub = self.inner.connector.connect_datanode(&addr).await?;
        self.inner
            .datanodes
            .write()
            .unwrap()
            .insert(group.to_string(), stub.clone());
        Ok(stub)
    }

    async fn datanode_stub(&self, group: &str) -> ClientResult<Arc<dyn DataNodeService>> {
        let cached = self.inner.datanodes.read().unwrap().get(group).cloned();
        match cached {
            Some(stub) => Ok(stub),
            None => self.refresh_datanode(group).await,
        }
    }

    /// Read a chunk range, rediscovering the group's primary a bounded
    /// number of times on transport failure.
    pub(crate) async fn read_chunk(
        &self,
        group: &str,
        req: ReadChunkRequest,
    ) -> ClientResult<ReadChunkReply> {
        let stub = self.datanode_stub(group).await?;
        let first = match stub.read_chunk(req.clone()).await {
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };
        warn!(group, error = %first, "chunk read failed, rediscovering datanode");
        let mut last = first.to_string();
        for _ in 0..REDISCOVERY_ATTEMPTS {
            let stub = match self.refresh_datanode(group).await {
                Ok(stub) => stub,
                Err(e) => {
                    last = e.to_string();
                    continue;
                }
            };
            match stub.read_chunk(req.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(e) => last = e.to_string(),
            }
        }
        Err(ClientError::Transport(last))
    }

    /// Write a chunk range, with the same rediscovery rules as reads.
    pub(crate) async fn write_chunk(
        &self,
        group: &str,
        req: WriteChunkRequest,
    ) -> ClientResult<WriteChunkReply> {
        let stub = self.datanode_stub(group).await?;
        let first = match stub.write_chunk(req.clone()).await {
            Ok(reply) => return Ok(reply),
            Err(e) => e,
        };
        warn!(group, error = %first, "chunk write failed, rediscovering datanode");
        let mut last = first.to_string();
        for _ in 0..REDISCOVERY_ATTEMPTS {
            let stub = match self.refresh_datanode(group).await {
                Ok(stub) => stub,
                Err(e) => {
                    last = e.to_string();
                    continue;
                }
            };
            match stub.write_chunk(req.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(e) => last = e.to_string(),
            }
        }
        Err(ClientError::Transport(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sheetfs_election::MemoryCoordinator;
    use sheetfs_proto::{ListSheetsReply, RpcError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Master stub: `create_sheet` succeeds when a fd is scripted, every
    /// other call (and an unscripted create) fails like a dead peer. Each
    /// attempt is counted.
    struct ScriptedMaster {
        create_fd: Option<u64>,
        calls: AtomicUsize,
    }

    impl ScriptedMaster {
        fn down() -> Arc<Self> {
            Arc::new(Self {
                create_fd: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn serving(fd: u64) -> Arc<Self> {
            Arc::new(Self {
                create_fd: Some(fd),
                calls: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail<T>(&self) -> RpcResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::Transport("connection reset".into()))
        }
    }

    #[async_trait]
    impl MasterService for ScriptedMaster {
        async fn register_data_node(
            &self,
            _req: sheetfs_proto::RegisterDataNodeRequest,
        ) -> RpcResult<sheetfs_proto::RegisterDataNodeReply> {
            self.fail()
        }

        async fn create_sheet(
            &self,
            _req: CreateSheetRequest,
        ) -> RpcResult<CreateSheetReply> {
            match self.create_fd {
                Some(fd) => Ok(CreateSheetReply {
                    status: Status::Ok,
                    fd,
                }),
                None => self.fail(),
            }
        }

        async fn open_sheet(&self, _req: OpenSheetRequest) -> RpcResult<OpenSheetReply> {
            self.fail()
        }

        async fn delete_sheet(&self, _req: DeleteSheetRequest) -> RpcResult<DeleteSheetReply> {
            self.fail()
        }

        async fn read_sheet(
            &self,
            _req: sheetfs_proto::ReadSheetRequest,
        ) -> RpcResult<sheetfs_proto::ReadSheetReply> {
            self.fail()
        }

        async fn read_cell(
            &self,
            _req: sheetfs_proto::ReadCellRequest,
        ) -> RpcResult<sheetfs_proto::ReadCellReply> {
            self.fail()
        }

        async fn write_cell(
            &self,
            _req: sheetfs_proto::WriteCellRequest,
        ) -> RpcResult<sheetfs_proto::WriteCellReply> {
            self.fail()
        }

        async fn recycle_sheet(
            &self,
            _req: RecycleSheetRequest,
        ) -> RpcResult<sheetfs_proto::RecycleSheetReply> {
            self.fail()
        }

        async fn resume_sheet(
            &self,
            _req: ResumeSheetRequest,
        ) -> RpcResult<sheetfs_proto::ResumeSheetReply> {
            self.fail()
        }

        async fn list_sheets(&self, _req: ListSheetsRequest) -> RpcResult<ListSheetsReply> {
            self.fail()
        }
    }

    /// Datanode stub that fails every call, counting attempts.
    struct DownDataNode {
        calls: AtomicUsize,
    }

    impl DownDataNode {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail<T>(&self) -> RpcResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::Transport("connection reset".into()))
        }
    }

    #[async_trait]
    impl DataNodeService for DownDataNode {
        async fn read_chunk(&self, _req: ReadChunkRequest) -> RpcResult<ReadChunkReply> {
            self.fail()
        }

        async fn write_chunk(&self, _req: WriteChunkRequest) -> RpcResult<WriteChunkReply> {
            self.fail()
        }

        async fn delete_chunk(
            &self,
            _req: sheetfs_proto::DeleteChunkRequest,
        ) -> RpcResult<sheetfs_proto::DeleteChunkReply> {
            self.fail()
        }
    }

    /// Connector handing out the same stubs regardless of address.
    struct StubNet {
        master: Arc<ScriptedMaster>,
        datanode: Arc<DownDataNode>,
    }

    #[async_trait]
    impl Connector for StubNet {
        async fn connect_master(&self, _addr: &str) -> RpcResult<Arc<dyn MasterService>> {
            Ok(self.master.clone())
        }

        async fn connect_datanode(&self, _addr: &str) -> RpcResult<Arc<dyn DataNodeService>> {
            Ok(self.datanode.clone())
        }
    }

    /// Connector routing master addresses to distinct stubs, for failover.
    struct SplitNet {
        dead: Arc<ScriptedMaster>,
        live: Arc<ScriptedMaster>,
    }

    #[async_trait]
    impl Connector for SplitNet {
        async fn connect_master(&self, addr: &str) -> RpcResult<Arc<dyn MasterService>> {
            match addr {
                "dead:8432" => Ok(self.dead.clone()),
                "live:8432" => Ok(self.live.clone()),
                _ => Err(RpcError::Transport(format!("no route to {}", addr))),
            }
        }

        async fn connect_datanode(&self, _addr: &str) -> RpcResult<Arc<dyn DataNodeService>> {
            Err(RpcError::Transport("no route".into()))
        }
    }

    async fn stub_client(
        master: Arc<ScriptedMaster>,
        datanode: Arc<DownDataNode>,
    ) -> Client {
        let coordinator = MemoryCoordinator::new();
        coordinator.ack_leader("master", "m0:8432").await.unwrap();
        coordinator.ack_leader("dn-g0", "d0:9000").await.unwrap();
        Client::connect(
            Arc::new(StubNet { master, datanode }),
            coordinator,
            "master",
        )
        .await
        .unwrap()
    }

    fn read_req() -> ReadChunkRequest {
        ReadChunkRequest {
            id: 1,
            offset: 0,
            size: 8,
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_master_call_gives_up_after_bounded_rediscovery() {
        let master = ScriptedMaster::down();
        let client = stub_client(master.clone(), DownDataNode::new()).await;

        let result = client.create("s").await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        // One direct attempt plus one per rediscovery round.
        assert_eq!(master.attempts(), REDISCOVERY_ATTEMPTS + 1);
    }

    #[tokio::test]
    async fn test_master_rediscovery_reaches_new_primary() {
        let dead = ScriptedMaster::down();
        let live = ScriptedMaster::serving(7);
        let coordinator = MemoryCoordinator::new();
        coordinator.ack_leader("master", "dead:8432").await.unwrap();
        let client = Client::connect(
            Arc::new(SplitNet {
                dead: dead.clone(),
                live: live.clone(),
            }),
            coordinator.clone(),
            "master",
        )
        .await
        .unwrap();

        // The old primary dies after the client connected; the ack now
        // names its successor.
        coordinator.ack_leader("master", "live:8432").await.unwrap();

        let file = client.create("s").await.unwrap();
        assert_eq!(file.fd(), 7);
        assert_eq!(dead.attempts(), 1);
    }

    #[tokio::test]
    async fn test_read_chunk_gives_up_after_bounded_rediscovery() {
        let datanode = DownDataNode::new();
        let client = stub_client(ScriptedMaster::down(), datanode.clone()).await;

        let result = client.read_chunk("dn-g0", read_req()).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(datanode.attempts(), REDISCOVERY_ATTEMPTS + 1);
    }

    #[tokio::test]
    async fn test_write_chunk_gives_up_after_bounded_rediscovery() {
        let datanode = DownDataNode::new();
        let client = stub_client(ScriptedMaster::down(), datanode.clone()).await;

        let req = WriteChunkRequest {
            id: 1,
            offset: 0,
            size: 1,
            version: 1,
            padding: b' ',
            data: vec![b'x'],
        };
        let result = client.write_chunk("dn-g0", req).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(datanode.attempts(), REDISCOVERY_ATTEMPTS + 1);
    }

    #[tokio::test]
    async fn test_unacked_datanode_group_is_transport_error() {
        let datanode = DownDataNode::new();
        let client = stub_client(ScriptedMaster::down(), datanode.clone()).await;

        // No ack was ever published for this group; resolution itself fails
        // and no call reaches a stub.
        let result = client.read_chunk("dn-g9", read_req()).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(datanode.attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_names_rejected_without_rpc() {
        let master = ScriptedMaster::down();
        let client = stub_client(master.clone(), DownDataNode::new()).await;

        for name in ["", "a/b", "a\\b"] {
            assert!(matches!(
                client.create(name).await,
                Err(ClientError::InvalidName)
            ));
            assert!(matches!(
                client.open(name).await,
                Err(ClientError::InvalidName)
            ));
        }
        assert_eq!(master.attempts(), 0);
    }
}
