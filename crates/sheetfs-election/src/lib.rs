//! Leader election through an external coordination service.
//!
//! Each primary/secondary group elects its primary by creating ephemeral
//! sequential proposals under the group's election prefix; the proposal with
//! the smallest sequence number is the leader, and every other node watches
//! its immediate predecessor. The winner publishes its client-facing address
//! under the group's well-known ack name once (and only once) it is ready to
//! serve.
//!
//! The coordination service itself is an external collaborator, so this
//! crate fixes the contract as the [`Coordinator`] trait and ships an
//! in-memory implementation for tests and single-host runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;

/// Error variants for election operations.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// No leader has acked for the group yet.
    #[error("no acked leader for group {0}")]
    NoLeader(String),
    /// The proposal is not registered with the coordinator (e.g. already
    /// removed).
    #[error("unknown proposal {seq} in group {group}")]
    UnknownProposal {
        /// Election group of the proposal.
        group: String,
        /// Sequence number of the proposal.
        seq: u64,
    },
    /// The coordination service failed.
    #[error("coordinator error: {0}")]
    Coordinator(String),
}

/// Result type alias for election operations.
pub type ElectionResult<T> = Result<T, ElectionError>;

/// An ephemeral sequential proposal under a group's election prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// The election group this proposal belongs to.
    pub group: String,
    /// Sequence number assigned by the coordinator; smallest wins.
    pub seq: u64,
}

/// Result of asking the coordinator whether a proposal currently leads.
pub enum LeaderCheck {
    /// The proposal has the smallest sequence number; the caller is primary.
    Leader,
    /// Another proposal leads. The handle resolves when the watched
    /// predecessor proposal disappears.
    Follower(WatchHandle),
}

/// Resolves when the watched proposal is deleted.
#[derive(Clone)]
pub struct WatchHandle {
    gone: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl WatchHandle {
    /// Wait until the watched proposal disappears. Returns immediately if it
    /// is already gone.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.gone.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// True when the watched proposal is already gone.
    pub fn is_resolved(&self) -> bool {
        self.gone.load(Ordering::SeqCst)
    }
}

/// Election coordinator contract: ephemeral sequential proposals plus a
/// well-known ack name per group.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Create an ephemeral sequential proposal under `group`.
    async fn create_proposal(&self, group: &str) -> ElectionResult<Proposal>;

    /// Check whether `proposal` currently has the smallest sequence number.
    async fn try_be_leader(&self, proposal: &Proposal) -> ElectionResult<LeaderCheck>;

    /// Remove a proposal (session teardown or crash).
    async fn remove_proposal(&self, proposal: &Proposal) -> ElectionResult<()>;

    /// Publish the leader's client-facing address under `<group>/ack`.
    async fn ack_leader(&self, group: &str, addr: &str) -> ElectionResult<()>;

    /// Read the address published under `<group>/ack`.
    async fn leader_addr(&self, group: &str) -> ElectionResult<String>;
}

struct ProposalState {
    gone: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct GroupState {
    next_seq: u64,
    proposals: BTreeMap<u64, ProposalState>,
    ack: Option<String>,
}

/// In-memory coordinator. Proposals are "ephemeral" in the sense that the
/// test harness removes them explicitly to simulate a crashed session.
#[derive(Default)]
pub struct MemoryCoordinator {
    groups: Mutex<HashMap<String, GroupState>>,
}

impl MemoryCoordinator {
    /// Create a coordinator with no groups.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn create_proposal(&self, group: &str) -> ElectionResult<Proposal> {
        let mut groups = self.groups.lock().unwrap();
        let state = groups.entry(group.to_string()).or_default();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.proposals.insert(
            seq,
            ProposalState {
                gone: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
            },
        );
        Ok(Proposal {
            group: group.to_string(),
            seq,
        })
    }

    async fn try_be_leader(&self, proposal: &Proposal) -> ElectionResult<LeaderCheck> {
        let groups = self.groups.lock().unwrap();
        let state = groups
            .get(&proposal.group)
            .ok_or_else(|| ElectionError::UnknownProposal {
                group: proposal.group.clone(),
                seq: proposal.seq,
            })?;
        if !state.proposals.contains_key(&proposal.seq) {
            return Err(ElectionError::UnknownProposal {
                group: proposal.group.clone(),
                seq: proposal.seq,
            });
        }
        // Watch the immediate predecessor, not the current leader, so a
        // deletion in the middle of the chain wakes exactly one node.
        let predecessor = state
            .proposals
            .range(..proposal.seq)
            .next_back()
            .map(|(_, p)| WatchHandle {
                gone: p.gone.clone(),
                notify: p.notify.clone(),
            });
        match predecessor {
            None => Ok(LeaderCheck::Leader),
            Some(handle) => Ok(LeaderCheck::Follower(handle)),
        }
    }

    async fn remove_proposal(&self, proposal: &Proposal) -> ElectionResult<()> {
        let mut groups = self.groups.lock().unwrap();
        if let Some(state) = groups.get_mut(&proposal.group) {
            if let Some(removed) = state.proposals.remove(&proposal.seq) {
                removed.gone.store(true, Ordering::SeqCst);
                removed.notify.notify_waiters();
            }
        }
        Ok(())
    }

    async fn ack_leader(&self, group: &str, addr: &str) -> ElectionResult<()> {
        let mut groups = self.groups.lock().unwrap();
        let state = groups.entry(group.to_string()).or_default();
        state.ack = Some(addr.to_string());
        Ok(())
    }

    async fn leader_addr(&self, group: &str) -> ElectionResult<String> {
        let groups = self.groups.lock().unwrap();
        groups
            .get(group)
            .and_then(|s| s.ack.clone())
            .ok_or_else(|| ElectionError::NoLeader(group.to_string()))
    }
}
