//! Single-flight cell.
//!
//! Coalesces concurrent requests for one in-progress operation: the first
//! caller starts it, later callers join, and completion hands the same
//! outcome to everyone before the cell clears.

use tokio::sync::oneshot;

#[derive(Debug)]
pub struct SingleFlight<T> {
    waiters: Option<Vec<oneshot::Sender<T>>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self { waiters: None }
    }

    pub fn is_in_flight(&self) -> bool {
        self.waiters.is_some()
    }

    /// Mark an operation as started with no waiters yet.
    /// Returns false if one was already running.
    pub fn begin(&mut self) -> bool {
        if self.waiters.is_some() {
            return false;
        }
        self.waiters = Some(Vec::new());
        true
    }

    /// Wait on the current operation, starting one if idle.
    /// Returns true when the caller must actually start the operation.
    pub fn join(&mut self, waiter: oneshot::Sender<T>) -> bool {
        let started = self.begin();
        if let Some(waiters) = self.waiters.as_mut() {
            waiters.push(waiter);
        }
        started
    }

    /// Deliver `outcome` to every waiter and clear the cell.
    /// Returns how many waiters were still listening.
    pub fn complete(&mut self, outcome: T) -> usize {
        self.waiters
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|waiter| waiter.send(outcome.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}
