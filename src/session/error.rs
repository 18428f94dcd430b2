//! Session Error Types
//!
//! Errors surfaced by sessions and by individual commands.

use thiserror::Error;

use crate::command::{CancelReason, CommandResult};
use crate::transport::TransportError;

/// Session-level errors
///
/// `Clone` so one connection outcome can reach every waiting caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Connection to {host_id} failed: {source}")]
    Connect {
        host_id: String,
        #[source]
        source: TransportError,
    },

    #[error("Session disposed")]
    Disposed,
}

/// Why a command's completion handle rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Cancelled; carries whatever output was captured before settlement
    #[error("Command {command_id} cancelled ({reason})")]
    Cancelled {
        command_id: String,
        reason: CancelReason,
        result: Option<Box<CommandResult>>,
    },

    /// Exec initiation or channel-level failure
    #[error("Command {command_id} failed: {message}")]
    Execution {
        command_id: String,
        message: String,
        result: Option<Box<CommandResult>>,
    },

    #[error("Duplicate command id: {0}")]
    DuplicateId(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CommandError {
    pub fn cancelled(command_id: impl Into<String>, reason: CancelReason) -> Self {
        Self::Cancelled {
            command_id: command_id.into(),
            reason,
            result: None,
        }
    }

    /// Cancellation reason, if this is a cancellation
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Output captured before the command settled
    pub fn partial_result(&self) -> Option<&CommandResult> {
        match self {
            Self::Cancelled { result, .. } | Self::Execution { result, .. } => result.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for command completion
pub type CommandOutcome = Result<CommandResult, CommandError>;
