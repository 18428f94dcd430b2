//! Command Types
//!
//! Type definitions for commands executed on a remote session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::abort::AbortSignal;

/// Host identifier used as the registry key
pub type HostId = String;

/// Why a command was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelReason {
    /// Explicit user request
    User,
    /// Per-command timer fired
    Timeout,
    /// External abort signal triggered
    Abort,
    /// Owning session was disposed
    SessionDisposed,
    /// Physical connection dropped while the command was running
    ConnectionLost,
    /// Anything else
    Other,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Timeout => "timeout",
            Self::Abort => "abort",
            Self::SessionDisposed => "session-disposed",
            Self::ConnectionLost => "connection-lost",
            Self::Other => "other",
        }
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::Other
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested remote execution
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Caller-supplied identifier; generated when absent
    pub id: Option<String>,
    /// Shell command line
    pub command: String,
    /// Working directory to change into first
    pub cwd: Option<String>,
    /// Environment variables requested on the channel
    pub env: HashMap<String, String>,
    /// Per-command timeout; `None` uses the session default, zero disables
    pub timeout: Option<Duration>,
    /// Queue priority; `None` uses the queue default
    pub priority: Option<i32>,
    /// External cancellation
    pub abort: Option<AbortSignal>,
}

impl CommandSpec {
    /// Create a spec for `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout in milliseconds; zero or negative disables the timer
    pub fn with_timeout_ms(mut self, ms: i64) -> Self {
        self.timeout = Some(Duration::from_millis(ms.max(0) as u64));
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    /// Timeout actually armed for this command, given the session default
    pub fn effective_timeout(&self, default: Duration) -> Option<Duration> {
        let timeout = self.timeout.unwrap_or(default);
        if timeout.is_zero() {
            None
        } else {
            Some(timeout)
        }
    }

    /// Command line sent to the remote, working-directory change included
    pub fn command_line(&self) -> String {
        match &self.cwd {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), self.command),
            None => self.command.clone(),
        }
    }
}

/// POSIX single-quote escaping
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Outcome of a command that ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: String,
    /// Exit code, absent when killed by a signal or never reported
    pub code: Option<u32>,
    /// Terminating signal reported by the remote
    pub signal: Option<String>,
    pub stdout: String,
    pub stderr: String,
    /// Output exceeded the session's buffer cap
    pub truncated: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl CommandResult {
    /// Check if the remote reported exit code zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Generate a command identifier
pub fn generate_command_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
