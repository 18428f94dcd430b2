//! Session State
//!
//! Connection status of a host session and the snapshot handed to callers.

use serde::{Deserialize, Serialize};

/// Status of a session's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Connection attempt in flight
    Connecting,
    /// Connected; queued commands may start
    Ready,
    /// Connection lost, reconnect pending
    Degraded,
    /// Not connected yet, or disposed
    Closed,
    /// Last connection attempt failed
    Error,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Closed
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable session snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub host_id: String,
    pub status: SessionStatus,
    /// Commands waiting in the queue
    pub queued: usize,
    /// Commands currently running
    pub in_flight: usize,
    pub reconnect_attempts: u32,
    pub concurrency: usize,
    pub disposed: bool,
}

impl SessionInfo {
    /// Snapshot for a session whose driver has already stopped
    pub fn stopped(host_id: impl Into<String>, concurrency: usize) -> Self {
        Self {
            host_id: host_id.into(),
            status: SessionStatus::Closed,
            queued: 0,
            in_flight: 0,
            reconnect_attempts: 0,
            concurrency,
            disposed: true,
        }
    }

    /// Check if the session can accept commands
    pub fn is_accepting(&self) -> bool {
        !self.disposed
    }
}
