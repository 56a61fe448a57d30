use crate::error::{FilterError, Result};
use bincode::{Decode, Encode};
use serde::Serialize;
use std::fmt;

pub const OP_SET: &str = "SET";
pub const OP_CHECK: &str = "CHECK";

/// A replicated command as it travels through the log.
///
/// `term`, when present, is applied with
/// [`crate::TermWindowedFilter::update_term`] before the operation itself, so
/// every replica advances its window at the same point of the log.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Command {
    pub op: String,
    pub args: Vec<String>,
    pub term: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Check,
}

impl Operation {
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::Set => OP_SET,
            Operation::Check => OP_CHECK,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Result of applying a command, one variant per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum CommandOutcome {
    Set { existed: bool },
    Check { present: bool },
}

/// A command that passed validation and is ready to touch the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCommand {
    pub operation: Operation,
    pub key: String,
    pub term: Option<u64>,
}

impl ValidCommand {
    /// Whether applying the command can change filter state.
    pub fn mutates(&self) -> bool {
        self.operation == Operation::Set || self.term.is_some()
    }
}

impl Command {
    pub fn new(operation: Operation, key: impl Into<String>) -> Self {
        Self {
            op: operation.tag().to_string(),
            args: vec![key.into()],
            term: None,
        }
    }

    pub fn set(key: impl Into<String>) -> Self {
        Self::new(Operation::Set, key)
    }

    pub fn check(key: impl Into<String>) -> Self {
        Self::new(Operation::Check, key)
    }

    pub fn with_term(mut self, term: u64) -> Self {
        self.term = Some(term);
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    /// Decodes and validates a command; nothing here touches the filter.
    pub fn decode(bytes: &[u8]) -> Result<ValidCommand> {
        let (command, read): (Command, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| {
                    FilterError::InvalidCommand(format!(
                        "cannot decode command: {e}"
                    ))
                })?;
        if read != bytes.len() {
            return Err(FilterError::InvalidCommand(format!(
                "{} trailing bytes after command",
                bytes.len() - read
            )));
        }
        command.validate()
    }

    pub fn validate(self) -> Result<ValidCommand> {
        let operation = match self.op.as_str() {
            OP_SET => Operation::Set,
            OP_CHECK => Operation::Check,
            other => return Err(FilterError::UnknownOperation(other.to_string())),
        };

        let Ok([key]) = <[String; 1]>::try_from(self.args) else {
            return Err(FilterError::InvalidCommand(format!(
                "{operation} takes exactly one argument"
            )));
        };

        Ok(ValidCommand {
            operation,
            key,
            term: self.term,
        })
    }
}
