//! Master node lifecycle: election, journal tailing, promotion, serving.
//!
//! A node moves through three strictly separated phases. As a secondary it
//! tails the master journal, applying entries in order. When its predecessor
//! proposal disappears and the coordinator names it leader, it fast-forwards
//! through every remaining entry with non-blocking fetches. Only then does
//! it expose the RPC surface and publish its address under the group's ack
//! name — a client that resolves the ack always reaches a fully caught-up
//! primary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sheetfs_election::{Coordinator, LeaderCheck, Proposal};
use sheetfs_journal::{JournalReceiver, JournalWriter};
use sheetfs_proto::MasterService;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::alloc::DataNodeAllocator;
use crate::catalog::{read_checkpoint, Catalog};
use crate::error::{MasterError, MasterResult};
use crate::filemgr::FileManager;
use crate::journal::MasterEntry;
use crate::service::MasterServer;

/// Lifecycle phase of a node. Replay and serving never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    /// Tailing the journal, waiting on the predecessor proposal.
    SecondaryReplay,
    /// Promoted; draining the remaining journal tail.
    FastForward,
    /// Caught up, acked, serving client requests.
    PrimaryServe,
}

/// Receives the RPC surface once the node is ready to serve. The transport
/// is pluggable; the test harness registers the service in its in-process
/// hub, a production deployment binds a listener.
pub trait MasterPublisher: Send + Sync {
    /// Make `service` reachable at `addr`. Called before the leader ack.
    fn publish(&self, addr: &str, service: Arc<dyn MasterService>);
}

/// Configuration for one master node.
#[derive(Debug, Clone)]
pub struct MasterNodeConfig {
    /// Identifier used in logs.
    pub node_id: String,
    /// Election group shared by the master replicas.
    pub election_group: String,
    /// Address clients use to reach this node once primary.
    pub client_addr: String,
    /// How often the primary checkpoints to the catalog.
    pub checkpoint_interval: Duration,
}

impl Default for MasterNodeConfig {
    fn default() -> Self {
        Self {
            node_id: "master-0".to_string(),
            election_group: "master".to_string(),
            client_addr: "127.0.0.1:8432".to_string(),
            checkpoint_interval: Duration::from_secs(30),
        }
    }
}

/// A master node before promotion.
pub struct MasterNode {
    config: MasterNodeConfig,
    coordinator: Arc<dyn Coordinator>,
    receiver: Box<dyn JournalReceiver>,
    writer: Arc<dyn JournalWriter>,
    catalog: Arc<dyn Catalog>,
    publisher: Arc<dyn MasterPublisher>,
    phase: Arc<Mutex<NodePhase>>,
}

/// A serving primary, returned by [`MasterNode::run`].
pub struct MasterHandle {
    /// The primary's file manager, mostly for tests and tooling.
    pub file_manager: Arc<FileManager>,
    /// The primary's datanode allocator.
    pub allocator: Arc<DataNodeAllocator>,
    /// The served RPC surface.
    pub service: Arc<MasterServer>,
    /// This node's election proposal.
    pub proposal: Proposal,
    phase: Arc<Mutex<NodePhase>>,
    checkpoint_task: JoinHandle<()>,
}

impl MasterHandle {
    /// Current lifecycle phase.
    pub fn phase(&self) -> NodePhase {
        *self.phase.lock().unwrap()
    }

    /// Stop the periodic checkpoint task. The in-memory state stays valid.
    pub fn shutdown(self) {
        self.checkpoint_task.abort();
    }
}

impl MasterNode {
    /// Assemble a node from its collaborators.
    pub fn new(
        config: MasterNodeConfig,
        coordinator: Arc<dyn Coordinator>,
        receiver: Box<dyn JournalReceiver>,
        writer: Arc<dyn JournalWriter>,
        catalog: Arc<dyn Catalog>,
        publisher: Arc<dyn MasterPublisher>,
    ) -> Self {
        Self {
            config,
            coordinator,
            receiver,
            writer,
            catalog,
            publisher,
            phase: Arc::new(Mutex::new(NodePhase::SecondaryReplay)),
        }
    }

    fn set_phase(&self, phase: NodePhase) {
        *self.phase.lock().unwrap() = phase;
        info!(node = %self.config.node_id, ?phase, "phase transition");
    }

    async fn apply_raw(&self, fm: &FileManager, raw: &[u8]) -> MasterResult<()> {
        fm.apply_entry(MasterEntry::decode(raw)?).await?;
        fm.note_replayed(self.receiver.next_offset());
        Ok(())
    }

    /// Participate in the election, replay as a secondary until promoted,
    /// fast-forward, then publish and ack the RPC surface.
    ///
    /// Resolves only when this node has become the serving primary.
    pub async fn run(self) -> MasterResult<MasterHandle> {
        let group = self.config.election_group.clone();
        let proposal = self
            .coordinator
            .create_proposal(&group)
            .await
            .map_err(|e| MasterError::Election(e.to_string()))?;

        let start_offset = read_checkpoint(self.catalog.as_ref())?.start_offset;
        self.receiver.set_offset(start_offset);

        let allocator = Arc::new(DataNodeAllocator::new());
        let fm = Arc::new(FileManager::load(
            self.catalog.clone(),
            allocator.clone(),
            Some(self.writer.clone()),
        )?);
        info!(
            node = %self.config.node_id,
            start_offset,
            "master node loaded checkpoint"
        );

        loop {
            let check = self
                .coordinator
                .try_be_leader(&proposal)
                .await
                .map_err(|e| MasterError::Election(e.to_string()))?;
            let watch = match check {
                LeaderCheck::Leader => break,
                LeaderCheck::Follower(watch) => watch,
            };
            loop {
                tokio::select! {
                    _ = watch.wait() => break,
                    fetched = self.receiver.fetch() => {
                        self.apply_raw(&fm, &fetched?).await?;
                    }
                }
            }
        }

        self.set_phase(NodePhase::FastForward);
        let mut drained: u64 = 0;
        while let Some(raw) = self.receiver.try_fetch()? {
            self.apply_raw(&fm, &raw).await?;
            drained += 1;
        }
        info!(node = %self.config.node_id, drained, "journal fast-forward complete");

        // The surface must be reachable before the ack is visible; a client
        // reading the ack name expects a caught-up, serving primary.
        let service = Arc::new(MasterServer::new(fm.clone(), allocator.clone()));
        self.publisher
            .publish(&self.config.client_addr, service.clone());
        self.coordinator
            .ack_leader(&group, &self.config.client_addr)
            .await
            .map_err(|e| MasterError::Election(e.to_string()))?;
        self.set_phase(NodePhase::PrimaryServe);
        info!(node = %self.config.node_id, addr = %self.config.client_addr, "serving as primary");

        let checkpoint_fm = fm.clone();
        let interval = self.config.checkpoint_interval;
        let checkpoint_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = checkpoint_fm.persist().await {
                    error!(error = %e, "periodic checkpoint failed");
                }
            }
        });

        Ok(MasterHandle {
            file_manager: fm,
            allocator,
            service,
            proposal,
            phase: self.phase,
            checkpoint_task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use sheetfs_election::MemoryCoordinator;
    use sheetfs_journal::MemoryJournalBus;
    use sheetfs_proto::{CreateSheetRequest, Status};

    struct NullPublisher;
    impl MasterPublisher for NullPublisher {
        fn publish(&self, _addr: &str, _service: Arc<dyn MasterService>) {}
    }

    fn node(
        coordinator: &Arc<MemoryCoordinator>,
        bus: &Arc<MemoryJournalBus>,
        catalog: Arc<dyn Catalog>,
        addr: &str,
    ) -> MasterNode {
        MasterNode::new(
            MasterNodeConfig {
                node_id: addr.to_string(),
                client_addr: addr.to_string(),
                checkpoint_interval: Duration::from_secs(3600),
                ..MasterNodeConfig::default()
            },
            coordinator.clone(),
            Box::new(bus.receiver("master")),
            Arc::new(bus.writer("master")),
            catalog,
            Arc::new(NullPublisher),
        )
    }

    #[tokio::test]
    async fn test_first_node_becomes_primary_and_acks() {
        let coordinator = MemoryCoordinator::new();
        let bus = MemoryJournalBus::new();
        let handle = node(&coordinator, &bus, Arc::new(MemoryCatalog::new()), "m0:1")
            .run()
            .await
            .unwrap();

        assert_eq!(handle.phase(), NodePhase::PrimaryServe);
        assert_eq!(coordinator.leader_addr("master").await.unwrap(), "m0:1");
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_secondary_promotes_with_full_state() {
        let coordinator = MemoryCoordinator::new();
        let bus = MemoryJournalBus::new();

        let primary = node(&coordinator, &bus, Arc::new(MemoryCatalog::new()), "m0:1")
            .run()
            .await
            .unwrap();
        primary.allocator.register("dn-0:9000");
        let fd = primary.file_manager.create_sheet("s").await.unwrap();
        for col in 0..3 {
            primary.file_manager.write_cell(fd, 0, col).await.unwrap();
        }

        // Secondary joins after the fact, then the primary's proposal
        // disappears (crash). run() resolves once promotion completes.
        let secondary = node(&coordinator, &bus, Arc::new(MemoryCatalog::new()), "m1:1");
        let secondary_task = tokio::spawn(secondary.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let dead = primary.proposal.clone();
        primary.shutdown();
        coordinator.remove_proposal(&dead).await.unwrap();

        let handle = secondary_task.await.unwrap().unwrap();
        assert_eq!(coordinator.leader_addr("master").await.unwrap(), "m1:1");

        // Every committed write is visible on the new primary.
        let reply = handle
            .service
            .create_sheet(CreateSheetRequest {
                filename: "s".into(),
            })
            .await
            .unwrap();
        assert_eq!(reply.status, Status::Exist);
        let fd = handle.file_manager.open_sheet("s").await.unwrap();
        let (_, chunk) = handle.file_manager.read_cell(fd, 0, 2).await.unwrap();
        assert_eq!(chunk.version, 3);
        handle.shutdown();
    }
}
