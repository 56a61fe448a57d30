use crate::command::CommandOutcome;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FilterError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Expired term: current term is {current}, but given {given}")]
    ExpiredTerm { current: u64, given: u64 },

    #[error("Term {given} is out of range: terms stop at {max}")]
    TermOutOfRange { given: u64, max: u64 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("Geometry mismatch on {field}: expected {expected}, found {found}")]
    GeometryMismatch {
        field: &'static str,
        expected: u64,
        found: u64,
    },

    #[error("Storage operation failed: {0}")]
    StorageError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error(
        "Failed to parse environment variable {var_name}: value '{value}' - {error}"
    )]
    EnvParseError {
        var_name: String,
        value: String,
        error: String,
    },

    #[cfg(feature = "redb")]
    #[error("ReDB error: {0}")]
    RedbError(#[from] Box<redb::Error>),
}

impl FilterError {
    /// Errors that mean the local copy of the filter can no longer be trusted.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FilterError::CorruptSnapshot(_)
                | FilterError::GeometryMismatch { .. }
                | FilterError::LockError(_)
        )
    }
}

impl From<serde_json::Error> for FilterError {
    fn from(err: serde_json::Error) -> Self {
        FilterError::SerializationError(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for FilterError {
    fn from(err: bincode::error::EncodeError) -> Self {
        FilterError::SerializationError(err.to_string())
    }
}

/// Errors surfaced by the replicated store facade.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not the leader: writes must be sent to the leader")]
    NotLeader,

    #[error("Timed out after {0:?} waiting for the command to apply")]
    Timeout(Duration),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Unexpected command outcome: {0:?}")]
    UnexpectedOutcome(CommandOutcome),
}
