//! Completion handle returned to command submitters.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use super::error::{CommandError, CommandOutcome, SessionError};

/// Resolves once with the command's result or error.
///
/// If the session goes away without settling the command, the handle
/// resolves with [`SessionError::Disposed`].
#[derive(Debug)]
pub struct CommandHandle {
    id: String,
    rx: oneshot::Receiver<CommandOutcome>,
}

impl CommandHandle {
    pub(crate) fn new(id: String, rx: oneshot::Receiver<CommandOutcome>) -> Self {
        Self { id, rx }
    }

    /// A handle that is already settled
    pub(crate) fn settled(id: String, outcome: CommandOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self::new(id, rx)
    }

    /// Command identifier, generated or caller-supplied
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for CommandHandle {
    type Output = CommandOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CommandError::Session(SessionError::Disposed))))
    }
}
