//! Datanode lifecycle: election, journal replay, promotion, registration.
//!
//! Same phase machine as the master node: tail the group's journal as a
//! secondary, drain the remaining tail on promotion, expose the RPC surface,
//! ack leadership — and then, unlike the master, register the group's
//! client-facing address with the current master primary, resolved through
//! the master group's ack name.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sheetfs_election::{Coordinator, LeaderCheck, Proposal};
use sheetfs_journal::{JournalReceiver, JournalWriter};
use sheetfs_proto::{Connector, DataNodeService, RegisterDataNodeRequest, Status};
use tracing::{info, warn};

use crate::error::{DataNodeError, DataNodeResult};
use crate::journal::JournalEntry;
use crate::service::DataNodeServer;
use crate::store::ChunkStore;

/// Lifecycle phase of a datanode. Replay and serving never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataNodePhase {
    /// Tailing the journal, waiting on the predecessor proposal.
    SecondaryReplay,
    /// Promoted; draining the remaining journal tail.
    FastForward,
    /// Caught up, acked, registered, serving client requests.
    PrimaryServe,
}

/// Receives the RPC surface once the node is ready to serve.
pub trait DataNodePublisher: Send + Sync {
    /// Make `service` reachable at `addr`. Called before the leader ack.
    fn publish(&self, addr: &str, service: Arc<dyn DataNodeService>);
}

/// Configuration for one datanode.
#[derive(Debug, Clone)]
pub struct DataNodeConfig {
    /// Identifier used in logs.
    pub node_id: String,
    /// Election group shared by this datanode group's replicas.
    pub election_group: String,
    /// Election group of the masters, for resolving the master primary.
    pub master_group: String,
    /// Address clients use to reach this node once primary.
    pub client_addr: String,
    /// Directory holding the chunk files.
    pub data_dir: PathBuf,
    /// Journal offset to resume consuming from.
    pub start_offset: u64,
}

impl Default for DataNodeConfig {
    fn default() -> Self {
        Self {
            node_id: "datanode-0".to_string(),
            election_group: "datanode-g0".to_string(),
            master_group: "master".to_string(),
            client_addr: "127.0.0.1:9000".to_string(),
            data_dir: PathBuf::from("./data"),
            start_offset: 0,
        }
    }
}

/// A datanode before promotion.
pub struct DataNode {
    config: DataNodeConfig,
    coordinator: Arc<dyn Coordinator>,
    receiver: Box<dyn JournalReceiver>,
    writer: Arc<dyn JournalWriter>,
    connector: Arc<dyn Connector>,
    publisher: Arc<dyn DataNodePublisher>,
    phase: Arc<Mutex<DataNodePhase>>,
}

/// A serving datanode primary, returned by [`DataNode::run`].
pub struct DataNodeHandle {
    /// The primary's chunk store, mostly for tests and tooling.
    pub store: Arc<ChunkStore>,
    /// The served RPC surface.
    pub service: Arc<DataNodeServer>,
    /// This node's election proposal.
    pub proposal: Proposal,
    phase: Arc<Mutex<DataNodePhase>>,
}

impl DataNodeHandle {
    /// Current lifecycle phase.
    pub fn phase(&self) -> DataNodePhase {
        *self.phase.lock().unwrap()
    }
}

impl DataNode {
    /// Assemble a node from its collaborators.
    pub fn new(
        config: DataNodeConfig,
        coordinator: Arc<dyn Coordinator>,
        receiver: Box<dyn JournalReceiver>,
        writer: Arc<dyn JournalWriter>,
        connector: Arc<dyn Connector>,
        publisher: Arc<dyn DataNodePublisher>,
    ) -> Self {
        Self {
            config,
            coordinator,
            receiver,
            writer,
            connector,
            publisher,
            phase: Arc::new(Mutex::new(DataNodePhase::SecondaryReplay)),
        }
    }

    fn set_phase(&self, phase: DataNodePhase) {
        *self.phase.lock().unwrap() = phase;
        info!(node = %self.config.node_id, ?phase, "phase transition");
    }

    fn replay_raw(&self, store: &ChunkStore, raw: &[u8]) -> DataNodeResult<()> {
        let entry = JournalEntry::decode(raw)?;
        store.replay(&entry)
    }

    /// Participate in the election, replay as a secondary until promoted,
    /// fast-forward, publish and ack the RPC surface, then register with
    /// the master primary.
    ///
    /// Resolves only when this node has become the serving primary.
    pub async fn run(self) -> DataNodeResult<DataNodeHandle> {
        let group = self.config.election_group.clone();
        let proposal = self
            .coordinator
            .create_proposal(&group)
            .await
            .map_err(|e| DataNodeError::Election(e.to_string()))?;
        self.receiver.set_offset(self.config.start_offset);
        let store = Arc::new(ChunkStore::open(&self.config.data_dir)?);

        loop {
            let check = self
                .coordinator
                .try_be_leader(&proposal)
                .await
                .map_err(|e| DataNodeError::Election(e.to_string()))?;
            let watch = match check {
                LeaderCheck::Leader => break,
                LeaderCheck::Follower(watch) => watch,
            };
            loop {
                tokio::select! {
                    _ = watch.wait() => break,
                    fetched = self.receiver.fetch() => {
                        self.replay_raw(&store, &fetched?)?;
                    }
                }
            }
        }

        self.set_phase(DataNodePhase::FastForward);
        let mut drained: u64 = 0;
        while let Some(raw) = self.receiver.try_fetch()? {
            self.replay_raw(&store, &raw)?;
            drained += 1;
        }
        info!(node = %self.config.node_id, drained, "journal fast-forward complete");

        // Reachable first, acked second: a client resolving the ack name
        // must land on a caught-up, serving primary.
        let service = Arc::new(DataNodeServer::new(
            store.clone(),
            Some(self.writer.clone()),
        ));
        self.publisher
            .publish(&self.config.client_addr, service.clone());
        self.coordinator
            .ack_leader(&group, &self.config.client_addr)
            .await
            .map_err(|e| DataNodeError::Election(e.to_string()))?;
        self.set_phase(DataNodePhase::PrimaryServe);

        let master_addr = self
            .coordinator
            .leader_addr(&self.config.master_group)
            .await
            .map_err(|e| DataNodeError::Registration(e.to_string()))?;
        let master = self
            .connector
            .connect_master(&master_addr)
            .await
            .map_err(|e| DataNodeError::Registration(e.to_string()))?;
        // The group name is the stable identity handed out in chunk
        // descriptors; clients resolve it to the current primary through
        // the coordinator, which keeps descriptors valid across failovers.
        let reply = master
            .register_data_node(RegisterDataNodeRequest {
                addr: self.config.election_group.clone(),
            })
            .await
            .map_err(|e| DataNodeError::Registration(e.to_string()))?;
        if reply.status != Status::Ok {
            warn!(status = %reply.status, "master rejected registration");
            return Err(DataNodeError::Registration(format!(
                "master replied {}",
                reply.status
            )));
        }
        info!(
            node = %self.config.node_id,
            addr = %self.config.client_addr,
            master = %master_addr,
            "serving as primary"
        );

        Ok(DataNodeHandle {
            store,
            service,
            proposal,
            phase: self.phase,
        })
    }
}
