use crate::command::{Command, CommandOutcome};
use crate::error::{Result, StoreError, StoreResult};
use crate::filter::FilterConfig;
use crate::replication::{LocalReplicator, Replicator};
use crate::state_machine::BloomStateMachine;
use crate::storage::TermArchive;
use crate::windowed_filter::WindowStats;
use derive_builder::Builder;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug, Builder)]
#[builder(pattern = "owned")]
pub struct StoreConfig {
    #[builder(default)]
    pub filter: FilterConfig,

    /// Upper bound on how long a write waits to be committed and applied
    #[builder(default = "Duration::from_secs(10)")]
    pub apply_timeout: Duration,

    /// Log entries kept before the local replicator compacts them into a
    /// snapshot (0 disables automatic compaction)
    #[builder(default = "1024")]
    pub snapshot_threshold: usize,
}

/// Client-facing facade over the replicated filter.
///
/// Writes go through the replicator and are only accepted on the leader.
/// [`Store::check`] reads the local replica directly and may lag behind
/// writes committed elsewhere; [`Store::check_consistent`] goes through the
/// log instead.
pub struct Store {
    config: StoreConfig,
    state: Arc<BloomStateMachine>,
    replicator: Arc<dyn Replicator>,
}

impl Store {
    /// Single-node store backed by a [`LocalReplicator`].
    pub fn new(config: StoreConfig) -> Result<Self> {
        let state = Arc::new(BloomStateMachine::new(config.filter.clone())?);
        Ok(Self::local(config, state))
    }

    pub fn with_archive(
        config: StoreConfig,
        archive: Arc<dyn TermArchive>,
    ) -> Result<Self> {
        let state = Arc::new(BloomStateMachine::with_archive(
            config.filter.clone(),
            archive,
        )?);
        Ok(Self::local(config, state))
    }

    fn local(config: StoreConfig, state: Arc<BloomStateMachine>) -> Self {
        let replicator = Arc::new(LocalReplicator::new(
            state.clone(),
            config.snapshot_threshold,
        ));
        Self::with_replicator(config, state, replicator)
    }

    /// Binds an existing replica to a replicator that delivers committed
    /// commands to it.
    pub fn with_replicator(
        config: StoreConfig,
        state: Arc<BloomStateMachine>,
        replicator: Arc<dyn Replicator>,
    ) -> Self {
        Self {
            config,
            state,
            replicator,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn state_machine(&self) -> &Arc<BloomStateMachine> {
        &self.state
    }

    pub fn is_leader(&self) -> bool {
        self.replicator.is_leader()
    }

    async fn propose(&self, command: Command) -> StoreResult<CommandOutcome> {
        if !self.replicator.is_leader() {
            return Err(StoreError::NotLeader);
        }
        let bytes = command.encode()?;
        let timeout = self.config.apply_timeout;
        match tokio::time::timeout(timeout, self.replicator.propose(bytes))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    async fn propose_set(&self, command: Command) -> StoreResult<bool> {
        match self.propose(command).await? {
            CommandOutcome::Set { existed } => Ok(existed),
            other => Err(StoreError::UnexpectedOutcome(other)),
        }
    }

    async fn propose_check(&self, command: Command) -> StoreResult<bool> {
        match self.propose(command).await? {
            CommandOutcome::Check { present } => Ok(present),
            other => Err(StoreError::UnexpectedOutcome(other)),
        }
    }

    /// Records `key` and returns whether it was already seen in the window.
    pub async fn set(&self, key: &str) -> StoreResult<bool> {
        self.propose_set(Command::set(key)).await
    }

    pub async fn set_with_term(
        &self,
        term: u64,
        key: &str,
    ) -> StoreResult<bool> {
        self.propose_set(Command::set(key).with_term(term)).await
    }

    /// Local read; does not go through the log.
    pub fn check(&self, key: &str) -> StoreResult<bool> {
        let present = self.state.local_check(key)?;
        debug!(key, present, "Local check");
        Ok(present)
    }

    pub async fn check_with_term(
        &self,
        term: u64,
        key: &str,
    ) -> StoreResult<bool> {
        self.propose_check(Command::check(key).with_term(term)).await
    }

    /// Check ordered after every write committed before it.
    pub async fn check_consistent(&self, key: &str) -> StoreResult<bool> {
        self.propose_check(Command::check(key)).await
    }

    /// Compacts the replicated log and returns the snapshot bytes.
    pub async fn snapshot(&self) -> StoreResult<Vec<u8>> {
        self.replicator.compact().await
    }

    pub fn terms(&self) -> StoreResult<(u64, u64)> {
        Ok(self.state.terms()?)
    }

    pub fn stats(&self) -> StoreResult<WindowStats> {
        Ok(self.state.stats()?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.config)
            .field("leader", &self.is_leader())
            .finish()
    }
}
