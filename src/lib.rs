// sshmux - multiplexed remote-shell sessions
//
// One `SessionManager` owns a session per host. Each session keeps its
// connection alive, queues commands by priority, runs them under a
// concurrency limit and publishes everything it does on a shared event bus.

pub mod command;
pub mod config;
pub mod launcher;
pub mod session;
pub mod transport;

pub use command::{AbortController, AbortSignal, CancelReason, CommandResult, CommandSpec, HostId};
pub use session::{
    CommandError, CommandHandle, EventBus, EventFilter, EventKind, Session, SessionError,
    SessionEvent, SessionManager, SessionOptions, SessionStatus, Subscription,
};
pub use transport::{Connector, RusshConnector};
