//! Session Events
//!
//! Event kinds, payloads and subscription filters for observers of session
//! and command lifecycles.

use serde::{Deserialize, Serialize};

use super::state::SessionStatus;
use crate::command::{CancelReason, CommandResult};

/// Closed set of observable event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    SessionStatus,
    SessionLog,
    CommandQueued,
    CommandStart,
    CommandStdout,
    CommandStderr,
    CommandEnd,
    CommandCancelled,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::SessionStatus,
        EventKind::SessionLog,
        EventKind::CommandQueued,
        EventKind::CommandStart,
        EventKind::CommandStdout,
        EventKind::CommandStderr,
        EventKind::CommandEnd,
        EventKind::CommandCancelled,
    ];

    /// Canonical event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStatus => "session:status",
            Self::SessionLog => "session:log",
            Self::CommandQueued => "command:queued",
            Self::CommandStart => "command:start",
            Self::CommandStdout => "command:stdout",
            Self::CommandStderr => "command:stderr",
            Self::CommandEnd => "command:end",
            Self::CommandCancelled => "command:cancelled",
        }
    }

    /// Look up a kind by its exact name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Kinds selected by `pattern`.
    ///
    /// `None`, empty or `*` select everything. A pattern containing `*`
    /// matches names glob-style, anchored at both ends; anything else must
    /// match a name exactly.
    pub fn resolve(pattern: Option<&str>) -> Vec<Self> {
        match pattern {
            None | Some("") | Some("*") => Self::ALL.to_vec(),
            Some(p) if p.contains('*') => Self::ALL
                .into_iter()
                .filter(|kind| wildcard_match(p, kind.name()))
                .collect(),
            Some(p) => Self::from_name(p).into_iter().collect(),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Anchored glob match where `*` stands for any run of characters
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };

    let middle: Vec<&str> = parts.collect();
    let Some((last, inner)) = middle.split_last() else {
        return rest.is_empty();
    };

    for part in inner {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// Severity of a `session:log` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Events published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Session status changed
    #[serde(rename = "session:status")]
    Status {
        host_id: String,
        status: SessionStatus,
    },

    /// Diagnostic message; advisory only
    #[serde(rename = "session:log")]
    Log {
        host_id: String,
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<serde_json::Value>,
    },

    #[serde(rename = "command:queued")]
    Queued {
        host_id: String,
        command_id: String,
        command: String,
    },

    #[serde(rename = "command:start")]
    Started {
        host_id: String,
        command_id: String,
        command: String,
    },

    #[serde(rename = "command:stdout")]
    Stdout {
        host_id: String,
        command_id: String,
        chunk: String,
    },

    #[serde(rename = "command:stderr")]
    Stderr {
        host_id: String,
        command_id: String,
        chunk: String,
    },

    /// Command settled; also emitted for cancelled and failed commands
    #[serde(rename = "command:end")]
    Ended {
        host_id: String,
        command_id: String,
        result: CommandResult,
    },

    #[serde(rename = "command:cancelled")]
    Cancelled {
        host_id: String,
        command_id: String,
        reason: CancelReason,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Status { .. } => EventKind::SessionStatus,
            Self::Log { .. } => EventKind::SessionLog,
            Self::Queued { .. } => EventKind::CommandQueued,
            Self::Started { .. } => EventKind::CommandStart,
            Self::Stdout { .. } => EventKind::CommandStdout,
            Self::Stderr { .. } => EventKind::CommandStderr,
            Self::Ended { .. } => EventKind::CommandEnd,
            Self::Cancelled { .. } => EventKind::CommandCancelled,
        }
    }

    /// Get the host ID from any event
    pub fn host_id(&self) -> &str {
        match self {
            Self::Status { host_id, .. }
            | Self::Log { host_id, .. }
            | Self::Queued { host_id, .. }
            | Self::Started { host_id, .. }
            | Self::Stdout { host_id, .. }
            | Self::Stderr { host_id, .. }
            | Self::Ended { host_id, .. }
            | Self::Cancelled { host_id, .. } => host_id,
        }
    }

    /// Command ID for command-scoped events
    pub fn command_id(&self) -> Option<&str> {
        match self {
            Self::Status { .. } | Self::Log { .. } => None,
            Self::Queued { command_id, .. }
            | Self::Started { command_id, .. }
            | Self::Stdout { command_id, .. }
            | Self::Stderr { command_id, .. }
            | Self::Ended { command_id, .. }
            | Self::Cancelled { command_id, .. } => Some(command_id),
        }
    }
}

/// Subscription filter; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub host_id: Option<String>,
    pub command_id: Option<String>,
    /// Event name or wildcard pattern such as `command:*`
    pub event: Option<String>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    pub fn command(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    pub fn event(mut self, pattern: impl Into<String>) -> Self {
        self.event = Some(pattern.into());
        self
    }

    /// Kinds this filter listens to
    pub fn event_kinds(&self) -> Vec<EventKind> {
        EventKind::resolve(self.event.as_deref())
    }

    /// Whether `event` passes the filter.
    pub fn matches(&self, event: &SessionEvent) -> bool {
        self.matches_scope(event) && self.matches_kind(event.kind())
    }

    /// Host and command checks only, for listeners already registered on
    /// the resolved kinds.
    ///
    /// The command filter only rejects events carrying a different command
    /// id, so session-scoped events still reach command-filtered observers.
    pub fn matches_scope(&self, event: &SessionEvent) -> bool {
        if let Some(host_id) = &self.host_id {
            if event.host_id() != host_id {
                return false;
            }
        }
        match (&self.command_id, event.command_id()) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }

    fn matches_kind(&self, kind: EventKind) -> bool {
        match self.event.as_deref() {
            None | Some("") | Some("*") => true,
            Some(p) if p.contains('*') => wildcard_match(p, kind.name()),
            Some(p) => p == kind.name(),
        }
    }
}
