//! Command Queue
//!
//! Priority-ordered holding area for commands that have not started yet.
//! Higher priority dequeues first; equal priorities keep arrival order.
//! The queue has no locking of its own: its owner serializes access.

use std::collections::VecDeque;

/// One queued value with its ordering keys
#[derive(Debug)]
struct QueueEntry<T> {
    priority: i32,
    value: T,
}

/// Priority-FIFO queue
#[derive(Debug)]
pub struct CommandQueue<T> {
    entries: VecDeque<QueueEntry<T>>,
    default_priority: i32,
}

impl<T> CommandQueue<T> {
    /// Create a queue whose entries default to priority 0
    pub fn new() -> Self {
        Self::with_default_priority(0)
    }

    /// Create a queue with a custom default priority
    pub fn with_default_priority(default_priority: i32) -> Self {
        Self {
            entries: VecDeque::new(),
            default_priority,
        }
    }

    /// Insert behind every entry of higher or equal priority
    pub fn enqueue(&mut self, value: T, priority: Option<i32>) {
        let priority = priority.unwrap_or(self.default_priority);

        let index = self
            .entries
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(index, QueueEntry { priority, value });
    }

    /// Remove the highest-priority, oldest entry
    pub fn dequeue(&mut self) -> Option<T> {
        self.entries.pop_front().map(|entry| entry.value)
    }

    /// The entry `dequeue` would return
    pub fn peek(&self) -> Option<&T> {
        self.entries.front().map(|entry| &entry.value)
    }

    /// Remove the first entry matching `predicate`
    pub fn remove<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.entries.iter().position(|entry| predicate(&entry.value))?;
        self.entries.remove(index).map(|entry| entry.value)
    }

    /// Remove and return every entry in dequeue order
    pub fn clear(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|entry| entry.value).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in dequeue order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.value)
    }
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
