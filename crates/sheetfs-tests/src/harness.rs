//! Test harness: in-process network hub and cluster bring-up.
//!
//! The hub implements the pluggable transport seams — the client-side
//! [`Connector`] and the nodes' publishers — by routing calls directly to
//! registered service objects. Unregistering an address simulates a crashed
//! primary: subsequent calls fail like a dead TCP peer, which is what
//! drives the clients' rediscovery paths in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use sheetfs_client::Client;
use sheetfs_datanode::{DataNode, DataNodeConfig, DataNodeHandle, DataNodePublisher};
use sheetfs_election::{Coordinator, MemoryCoordinator};
use sheetfs_journal::MemoryJournalBus;
use sheetfs_master::{
    MasterHandle, MasterNode, MasterNodeConfig, MasterPublisher, MemoryCatalog,
};
use sheetfs_proto::{Connector, DataNodeService, MasterService, RpcError, RpcResult};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Install a compact subscriber for debugging a failing scenario. Honors
/// `RUST_LOG`; safe to call from several tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// In-process transport hub: address to service object, no sockets.
pub struct InProcessNet {
    masters: RwLock<HashMap<String, Arc<dyn MasterService>>>,
    datanodes: RwLock<HashMap<String, Arc<dyn DataNodeService>>>,
    self_ref: std::sync::Weak<InProcessNet>,
}

impl InProcessNet {
    /// Create an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            masters: RwLock::new(HashMap::new()),
            datanodes: RwLock::new(HashMap::new()),
            self_ref: weak.clone(),
        })
    }

    fn arc(&self) -> Arc<InProcessNet> {
        self.self_ref.upgrade().expect("transport hub dropped")
    }

    /// Drop a master address, simulating a crashed primary.
    pub fn unregister_master(&self, addr: &str) {
        self.masters.write().unwrap().remove(addr);
    }

    /// Drop a datanode address, simulating a crashed primary.
    pub fn unregister_datanode(&self, addr: &str) {
        self.datanodes.write().unwrap().remove(addr);
    }
}

impl InProcessNet {
    fn lookup_master(&self, addr: &str) -> RpcResult<Arc<dyn MasterService>> {
        self.masters
            .read()
            .unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| RpcError::Transport(format!("no master listening at {}", addr)))
    }

    fn lookup_datanode(&self, addr: &str) -> RpcResult<Arc<dyn DataNodeService>> {
        self.datanodes
            .read()
            .unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| RpcError::Transport(format!("no datanode listening at {}", addr)))
    }
}

/// Stub that resolves its address on every call, so an unregistered
/// (crashed) server fails like a dead TCP peer even through cached stubs.
struct MasterStub {
    net: Arc<InProcessNet>,
    addr: String,
}

#[async_trait]
impl MasterService for MasterStub {
    async fn register_data_node(
        &self,
        req: sheetfs_proto::RegisterDataNodeRequest,
    ) -> RpcResult<sheetfs_proto::RegisterDataNodeReply> {
        self.net.lookup_master(&self.addr)?.register_data_node(req).await
    }

    async fn create_sheet(
        &self,
        req: sheetfs_proto::CreateSheetRequest,
    ) -> RpcResult<sheetfs_proto::CreateSheetReply> {
        self.net.lookup_master(&self.addr)?.create_sheet(req).await
    }

    async fn open_sheet(
        &self,
        req: sheetfs_proto::OpenSheetRequest,
    ) -> RpcResult<sheetfs_proto::OpenSheetReply> {
        self.net.lookup_master(&self.addr)?.open_sheet(req).await
    }

    async fn delete_sheet(
        &self,
        req: sheetfs_proto::DeleteSheetRequest,
    ) -> RpcResult<sheetfs_proto::DeleteSheetReply> {
        self.net.lookup_master(&self.addr)?.delete_sheet(req).await
    }

    async fn read_sheet(
        &self,
        req: sheetfs_proto::ReadSheetRequest,
    ) -> RpcResult<sheetfs_proto::ReadSheetReply> {
        self.net.lookup_master(&self.addr)?.read_sheet(req).await
    }

    async fn read_cell(
        &self,
        req: sheetfs_proto::ReadCellRequest,
    ) -> RpcResult<sheetfs_proto::ReadCellReply> {
        self.net.lookup_master(&self.addr)?.read_cell(req).await
    }

    async fn write_cell(
        &self,
        req: sheetfs_proto::WriteCellRequest,
    ) -> RpcResult<sheetfs_proto::WriteCellReply> {
        self.net.lookup_master(&self.addr)?.write_cell(req).await
    }

    async fn recycle_sheet(
        &self,
        req: sheetfs_proto::RecycleSheetRequest,
    ) -> RpcResult<sheetfs_proto::RecycleSheetReply> {
        self.net.lookup_master(&self.addr)?.recycle_sheet(req).await
    }

    async fn resume_sheet(
        &self,
        req: sheetfs_proto::ResumeSheetRequest,
    ) -> RpcResult<sheetfs_proto::ResumeSheetReply> {
        self.net.lookup_master(&self.addr)?.resume_sheet(req).await
    }

    async fn list_sheets(
        &self,
        req: sheetfs_proto::ListSheetsRequest,
    ) -> RpcResult<sheetfs_proto::ListSheetsReply> {
        self.net.lookup_master(&self.addr)?.list_sheets(req).await
    }
}

struct DataNodeStub {
    net: Arc<InProcessNet>,
    addr: String,
}

#[async_trait]
impl DataNodeService for DataNodeStub {
    async fn read_chunk(
        &self,
        req: sheetfs_proto::ReadChunkRequest,
    ) -> RpcResult<sheetfs_proto::ReadChunkReply> {
        self.net.lookup_datanode(&self.addr)?.read_chunk(req).await
    }

    async fn write_chunk(
        &self,
        req: sheetfs_proto::WriteChunkRequest,
    ) -> RpcResult<sheetfs_proto::WriteChunkReply> {
        self.net.lookup_datanode(&self.addr)?.write_chunk(req).await
    }

    async fn delete_chunk(
        &self,
        req: sheetfs_proto::DeleteChunkRequest,
    ) -> RpcResult<sheetfs_proto::DeleteChunkReply> {
        self.net.lookup_datanode(&self.addr)?.delete_chunk(req).await
    }
}

#[async_trait]
impl Connector for InProcessNet {
    async fn connect_master(&self, addr: &str) -> RpcResult<Arc<dyn MasterService>> {
        // Fail the dial when nothing listens, like a refused connection.
        self.lookup_master(addr)?;
        Ok(Arc::new(MasterStub {
            net: self.arc(),
            addr: addr.to_string(),
        }))
    }

    async fn connect_datanode(&self, addr: &str) -> RpcResult<Arc<dyn DataNodeService>> {
        self.lookup_datanode(addr)?;
        Ok(Arc::new(DataNodeStub {
            net: self.arc(),
            addr: addr.to_string(),
        }))
    }
}

impl MasterPublisher for InProcessNet {
    fn publish(&self, addr: &str, service: Arc<dyn MasterService>) {
        self.masters
            .write()
            .unwrap()
            .insert(addr.to_string(), service);
    }
}

impl DataNodePublisher for InProcessNet {
    fn publish(&self, addr: &str, service: Arc<dyn DataNodeService>) {
        self.datanodes
            .write()
            .unwrap()
            .insert(addr.to_string(), service);
    }
}

/// One in-process SheetFS deployment: coordinator, journal bus, transport
/// hub, and helpers to bring up nodes and clients.
pub struct TestCluster {
    /// The shared election coordinator.
    pub coordinator: Arc<MemoryCoordinator>,
    /// The shared journal bus.
    pub bus: Arc<MemoryJournalBus>,
    /// The in-process transport hub.
    pub net: Arc<InProcessNet>,
    tempdirs: Mutex<Vec<TempDir>>,
}

impl TestCluster {
    /// Fresh, empty cluster.
    pub fn new() -> Self {
        Self {
            coordinator: MemoryCoordinator::new(),
            bus: MemoryJournalBus::new(),
            net: InProcessNet::new(),
            tempdirs: Mutex::new(Vec::new()),
        }
    }

    fn master_node(&self, node_id: &str) -> MasterNode {
        MasterNode::new(
            MasterNodeConfig {
                node_id: node_id.to_string(),
                election_group: "master".to_string(),
                client_addr: format!("{}.master.test", node_id),
                checkpoint_interval: std::time::Duration::from_secs(3600),
            },
            self.coordinator.clone(),
            Box::new(self.bus.receiver("master")),
            Arc::new(self.bus.writer("master")),
            Arc::new(MemoryCatalog::new()),
            self.net.clone(),
        )
    }

    /// Start a master node and wait until it serves as primary.
    pub async fn start_master(&self, node_id: &str) -> MasterHandle {
        self.master_node(node_id)
            .run()
            .await
            .expect("master node failed to start")
    }

    /// Spawn a master node that is expected to wait as a secondary.
    pub fn spawn_master(&self, node_id: &str) -> JoinHandle<MasterHandle> {
        let node = self.master_node(node_id);
        tokio::spawn(async move { node.run().await.expect("master node failed to start") })
    }

    fn datanode_node(&self, group: &str, node_id: &str) -> DataNode {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let data_dir = dir.path().to_path_buf();
        self.tempdirs.lock().unwrap().push(dir);
        DataNode::new(
            DataNodeConfig {
                node_id: node_id.to_string(),
                election_group: group.to_string(),
                master_group: "master".to_string(),
                client_addr: format!("{}.{}.test", node_id, group),
                data_dir,
                start_offset: 0,
            },
            self.coordinator.clone(),
            Box::new(self.bus.receiver(group)),
            Arc::new(self.bus.writer(group)),
            self.net.clone(),
            self.net.clone(),
        )
    }

    /// Start a datanode and wait until it serves as the group's primary.
    /// The master must already be serving, registration goes through it.
    pub async fn start_datanode(&self, group: &str, node_id: &str) -> DataNodeHandle {
        self.datanode_node(group, node_id)
            .run()
            .await
            .expect("datanode failed to start")
    }

    /// Spawn a datanode that is expected to wait as a secondary.
    pub fn spawn_datanode(&self, group: &str, node_id: &str) -> JoinHandle<DataNodeHandle> {
        let node = self.datanode_node(group, node_id);
        tokio::spawn(async move { node.run().await.expect("datanode failed to start") })
    }

    /// Connect a client through the coordinator's master ack.
    pub async fn client(&self) -> Client {
        Client::connect(self.net.clone(), self.coordinator.clone(), "master")
            .await
            .expect("client failed to connect")
    }

    /// Kill a master primary: unreachable on the hub, proposal gone.
    pub async fn crash_master(&self, handle: MasterHandle, node_id: &str) {
        let proposal = handle.proposal.clone();
        self.net
            .unregister_master(&format!("{}.master.test", node_id));
        handle.shutdown();
        self.coordinator
            .remove_proposal(&proposal)
            .await
            .expect("coordinator rejected proposal removal");
    }

    /// Kill a datanode primary: unreachable on the hub, proposal gone.
    pub async fn crash_datanode(&self, handle: DataNodeHandle, group: &str, node_id: &str) {
        self.net
            .unregister_datanode(&format!("{}.{}.test", node_id, group));
        self.coordinator
            .remove_proposal(&handle.proposal)
            .await
            .expect("coordinator rejected proposal removal");
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}
