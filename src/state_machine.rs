use crate::command::{Command, CommandOutcome, Operation, ValidCommand};
use crate::error::{FilterError, Result};
use crate::filter::FilterConfig;
use crate::snapshot;
use crate::storage::TermArchive;
use crate::windowed_filter::{TermWindowedFilter, WindowStats};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info};

/// A deterministic state machine driven by a replicated log.
///
/// `apply` is only ever called with committed commands, one at a time and in
/// log order. `snapshot` and `restore` exchange opaque bytes with the
/// replication layer for log compaction and catch-up.
pub trait StateMachine: Send + Sync {
    type Output;

    fn apply(&self, command: &[u8]) -> Result<Self::Output>;
    fn snapshot(&self) -> Result<Vec<u8>>;
    fn restore(&self, snapshot: &[u8]) -> Result<()>;
}

/// Exposes a [`TermWindowedFilter`] as a replicated state machine.
///
/// Writers (`SET`, term changes, restore) hold the write lock for the whole
/// operation, including any rotation it triggers. Readers and snapshots share
/// the read lock, so a snapshot never observes a half-applied command.
pub struct BloomStateMachine {
    filter: RwLock<TermWindowedFilter>,
}

impl BloomStateMachine {
    pub fn new(config: FilterConfig) -> Result<Self> {
        Ok(Self::from_filter(TermWindowedFilter::new(config)?))
    }

    pub fn with_archive(
        config: FilterConfig,
        archive: Arc<dyn TermArchive>,
    ) -> Result<Self> {
        Ok(Self::from_filter(TermWindowedFilter::with_archive(
            config, archive,
        )?))
    }

    pub fn from_filter(filter: TermWindowedFilter) -> Self {
        Self {
            filter: RwLock::new(filter),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TermWindowedFilter>> {
        self.filter.read().map_err(|_| {
            FilterError::LockError("Failed to acquire read lock on filter".into())
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TermWindowedFilter>> {
        self.filter.write().map_err(|_| {
            FilterError::LockError(
                "Failed to acquire write lock on filter".into(),
            )
        })
    }

    /// Applies an already validated command.
    pub fn apply_command(
        &self,
        command: &ValidCommand,
    ) -> Result<CommandOutcome> {
        let key = command.key.as_bytes();

        if !command.mutates() {
            let present = self.read()?.check(key);
            debug!(key = %command.key, present, "Applied CHECK");
            return Ok(CommandOutcome::Check { present });
        }

        let mut filter = self.write()?;
        if let Some(term) = command.term {
            filter.update_term(term)?;
        }
        let outcome = match command.operation {
            Operation::Set => CommandOutcome::Set {
                existed: filter.set(key),
            },
            Operation::Check => CommandOutcome::Check {
                present: filter.check(key),
            },
        };
        debug!(
            key = %command.key,
            term = ?command.term,
            ?outcome,
            "Applied command"
        );
        Ok(outcome)
    }

    /// Membership check against local state, bypassing the log.
    pub fn local_check(&self, key: &str) -> Result<bool> {
        Ok(self.read()?.check(key.as_bytes()))
    }

    pub fn terms(&self) -> Result<(u64, u64)> {
        Ok(self.read()?.terms())
    }

    pub fn stats(&self) -> Result<WindowStats> {
        Ok(self.read()?.stats())
    }

    pub fn config(&self) -> Result<FilterConfig> {
        Ok(self.read()?.config().clone())
    }
}

impl StateMachine for BloomStateMachine {
    type Output = CommandOutcome;

    fn apply(&self, command: &[u8]) -> Result<CommandOutcome> {
        let command = Command::decode(command)?;
        self.apply_command(&command)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        let filter = self.read()?;
        let bytes = snapshot::encode_window_to_vec(&filter)?;
        let (earliest, latest) = filter.terms();
        info!(earliest, latest, bytes = bytes.len(), "Produced snapshot");
        Ok(bytes)
    }

    fn restore(&self, bytes: &[u8]) -> Result<()> {
        let mut fresh = self.read()?.empty_like()?;
        if let Err(e) = snapshot::decode_window(&mut &bytes[..], &mut fresh) {
            error!(error = %e, "Failed to restore snapshot");
            return Err(e);
        }

        let (earliest, latest) = fresh.terms();
        *self.write()? = fresh;
        info!(earliest, latest, "Restored snapshot");
        Ok(())
    }
}

impl std::fmt::Debug for BloomStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.filter.read() {
            Ok(filter) => write!(f, "BloomStateMachine {{ {filter:?} }}"),
            Err(_) => write!(f, "BloomStateMachine {{ <poisoned> }}"),
        }
    }
}
