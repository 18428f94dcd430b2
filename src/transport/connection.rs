//! Transport Abstraction
//!
//! The session layer never talks to the remote-shell library directly. It goes
//! through three narrow traits:
//! - [`Connector`] establishes one physical connection for a host
//! - [`Connection`] opens execution channels on it and closes it
//! - [`ExecChannel`] streams one command's output and accepts interrupts

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

use super::error::TransportResult;
use crate::session::SessionOptions;

/// Unsolicited connection events, delivered after the connection is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The transport reported an error; a close usually follows
    Error(String),
    /// The connection is gone
    Closed { had_error: bool },
}

/// Events produced by an execution channel, in the order the remote sent them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Chunk of standard output
    Stdout(String),
    /// Chunk of standard error
    Stderr(String),
    /// Exit status or terminating signal reported by the remote
    Exit {
        code: Option<u32>,
        signal: Option<String>,
    },
    /// Channel-level error
    Error(String),
    /// Channel closed; no further events follow
    Closed,
}

/// What to run on a freshly opened channel
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    /// Full command line, working-directory prefix included
    pub command: String,
    /// Environment variables requested before exec
    pub env: HashMap<String, String>,
}

/// A live connection plus its stream of unsolicited events
pub struct Established {
    pub connection: Box<dyn Connection>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// Establishes physical connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate to the host described by `options`
    async fn connect(&self, host_id: &str, options: &SessionOptions) -> TransportResult<Established>;

    /// Get connector name for logging
    fn connector_type(&self) -> &'static str;
}

/// One physical connection, exclusively owned by a session
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open an execution channel and start `request` on it
    async fn exec(&self, request: ExecRequest) -> TransportResult<Box<dyn ExecChannel>>;

    /// Graceful close; waits up to `grace` for the acknowledgment, then destroys
    async fn close(&self, grace: Duration);
}

/// One command's execution channel
#[async_trait]
pub trait ExecChannel: Send {
    /// Next event, or `None` once the channel is gone.
    ///
    /// Must be cancel-safe: it is raced against interrupt requests.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Ask the remote process to stop (SIGINT)
    async fn interrupt(&mut self) -> TransportResult<()>;

    /// Close the channel from our side
    async fn close(&mut self) -> TransportResult<()>;
}
