use crate::command::CommandOutcome;
use crate::error::{StoreError, StoreResult};
use crate::state_machine::StateMachine;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub type SharedStateMachine = Arc<dyn StateMachine<Output = CommandOutcome>>;

/// Boundary with the consensus layer.
///
/// Implementations deliver every committed command to every replica exactly
/// once and in the same order, and only accept proposals while this node is
/// the leader.
#[async_trait]
pub trait Replicator: Send + Sync {
    fn is_leader(&self) -> bool;

    /// Commits `command` and returns the outcome of applying it on this node.
    async fn propose(&self, command: Vec<u8>) -> StoreResult<CommandOutcome>;

    /// Folds the committed log into a snapshot and returns its bytes.
    async fn compact(&self) -> StoreResult<Vec<u8>>;
}

struct ReplicatedLog {
    replicas: Vec<SharedStateMachine>,
    entries: Vec<Vec<u8>>,
    snapshot: Option<Vec<u8>>,
    // Number of entries folded into `snapshot`
    snapshot_index: u64,
}

impl ReplicatedLog {
    fn commit_index(&self) -> u64 {
        self.snapshot_index + self.entries.len() as u64
    }

    fn compact(&mut self) -> StoreResult<Vec<u8>> {
        let bytes = self.replicas[0].snapshot()?;
        self.snapshot_index = self.commit_index();
        self.entries.clear();
        self.snapshot = Some(bytes.clone());
        info!(
            snapshot_index = self.snapshot_index,
            bytes = bytes.len(),
            "Compacted replicated log"
        );
        Ok(bytes)
    }
}

/// Single-process stand-in for a consensus group.
///
/// Holds a totally ordered log and applies each entry to every registered
/// replica before the proposal returns. The first replica is the local one;
/// its outcome is what the proposer sees.
pub struct LocalReplicator {
    log: Mutex<ReplicatedLog>,
    leader: AtomicBool,
    snapshot_threshold: usize,
}

impl LocalReplicator {
    pub fn new(local: SharedStateMachine, snapshot_threshold: usize) -> Self {
        Self {
            log: Mutex::new(ReplicatedLog {
                replicas: vec![local],
                entries: Vec::new(),
                snapshot: None,
                snapshot_index: 0,
            }),
            leader: AtomicBool::new(true),
            snapshot_threshold,
        }
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
        info!(leader, "Leadership changed");
    }

    /// Registers a follower and brings it up to the current commit index by
    /// restoring the latest snapshot and replaying the log after it.
    pub async fn add_replica(
        &self,
        replica: SharedStateMachine,
    ) -> StoreResult<()> {
        let mut log = self.log.lock().await;
        if let Some(snapshot) = &log.snapshot {
            replica.restore(snapshot)?;
        }
        let offset = log.snapshot_index;
        for (i, entry) in log.entries.iter().enumerate() {
            // rejected commands were rejected on every replica
            if let Err(e) = replica.apply(entry) {
                debug!(
                    index = offset + i as u64 + 1,
                    error = %e,
                    "Replayed command rejected"
                );
            }
        }
        log.replicas.push(replica);
        info!(
            replicas = log.replicas.len(),
            commit_index = log.commit_index(),
            "Added replica"
        );
        Ok(())
    }

    pub async fn commit_index(&self) -> u64 {
        self.log.lock().await.commit_index()
    }

    /// Entries not yet folded into a snapshot.
    pub async fn log_len(&self) -> usize {
        self.log.lock().await.entries.len()
    }
}

#[async_trait]
impl Replicator for LocalReplicator {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    async fn propose(&self, command: Vec<u8>) -> StoreResult<CommandOutcome> {
        if !self.is_leader() {
            return Err(StoreError::NotLeader);
        }

        let mut log = self.log.lock().await;
        let outcome = log.replicas[0].apply(&command);
        for (i, replica) in log.replicas.iter().enumerate().skip(1) {
            if let Err(e) = replica.apply(&command) {
                debug!(replica = i, error = %e, "Replica rejected command");
            }
        }
        log.entries.push(command);
        debug!(commit_index = log.commit_index(), "Committed command");

        if self.snapshot_threshold > 0
            && log.entries.len() >= self.snapshot_threshold
        {
            if let Err(e) = log.compact() {
                warn!(error = %e, "Log compaction failed");
            }
        }

        Ok(outcome?)
    }

    async fn compact(&self) -> StoreResult<Vec<u8>> {
        self.log.lock().await.compact()
    }
}

impl std::fmt::Debug for LocalReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReplicator")
            .field("leader", &self.is_leader())
            .field("snapshot_threshold", &self.snapshot_threshold)
            .finish()
    }
}
