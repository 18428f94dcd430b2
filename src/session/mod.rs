//! Session Management Module
//!
//! Per-host remote-shell sessions with:
//! - A driver task per session owning the connection and command queue
//! - Priority scheduling under a per-session concurrency limit
//! - Automatic reconnect with exponential backoff
//! - A shared event bus for status, logs, and command output
//! - A registry (`SessionManager`) multiplexing many hosts

pub mod bus;
pub mod completion;
pub(crate) mod driver;
pub mod error;
pub mod events;
pub mod handle;
pub mod manager;
pub mod options;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{EventBus, Subscription};
pub use completion::CommandHandle;
pub use error::{CommandError, CommandOutcome, SessionError};
pub use events::{EventFilter, EventKind, LogLevel, SessionEvent};
pub use handle::Session;
pub use manager::SessionManager;
pub use options::{BackoffConfig, SessionOptions};
pub use state::{SessionInfo, SessionStatus};
