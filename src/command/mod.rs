//! Command Module
//!
//! Building blocks for command execution: command and result types, the
//! priority queue, external abort signals and the single-flight cell.

pub mod abort;
pub mod flight;
pub mod queue;
pub mod types;

pub use abort::{AbortController, AbortSignal};
pub use flight::SingleFlight;
pub use queue::CommandQueue;
pub use types::{CancelReason, CommandResult, CommandSpec, HostId};
