//! Event Bus
//!
//! Synchronous many-to-many distribution of [`SessionEvent`]s keyed by
//! [`EventKind`]. Handlers for one kind run in registration order; a handler
//! that panics is logged and skipped without affecting the emitter or the
//! other handlers.

use log::warn;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::events::{EventKind, SessionEvent};

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct Listener {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
    next_id: AtomicU64,
}

/// Shared event bus; clones refer to the same listener set
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.subscribe_shared(kind, Arc::new(handler))
    }

    /// Register one shared handler for several kinds
    pub fn subscribe_many<F>(&self, kinds: &[EventKind], handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let mut subscription = Subscription::empty(self);
        for kind in kinds {
            subscription.merge(self.subscribe_shared(*kind, handler.clone()));
        }
        subscription
    }

    fn subscribe_shared(&self, kind: EventKind, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .entry(kind)
            .or_default()
            .push(Listener { id, handler });

        Subscription {
            bus: Arc::downgrade(&self.inner),
            entries: vec![(kind, id)],
        }
    }

    /// Deliver `event` to every handler of its kind.
    ///
    /// Handlers run outside the lock, so they may subscribe or unsubscribe.
    pub fn emit(&self, event: &SessionEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = match self.inner.listeners.read().get(&kind) {
            Some(listeners) => listeners.iter().map(|l| l.handler.clone()).collect(),
            None => return,
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("Listener for {} panicked; continuing", kind);
            }
        }
    }

    /// Number of handlers registered for `kind`
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .listeners
            .read()
            .get(&kind)
            .map_or(0, |listeners| listeners.len())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.inner.listeners.read();
        f.debug_struct("EventBus")
            .field("listeners", &listeners.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

/// Handle returned by subscribe; removes its listeners on `unsubscribe`.
///
/// Dropping it without unsubscribing leaves the listeners registered.
#[must_use = "listeners stay registered until unsubscribe is called"]
pub struct Subscription {
    bus: Weak<BusInner>,
    entries: Vec<(EventKind, u64)>,
}

impl Subscription {
    fn empty(bus: &EventBus) -> Self {
        Self {
            bus: Arc::downgrade(&bus.inner),
            entries: Vec::new(),
        }
    }

    /// Fold another subscription into this one
    pub fn merge(&mut self, other: Subscription) {
        self.entries.extend(other.entries);
    }

    /// Event kinds covered by this subscription
    pub fn kinds(&self) -> Vec<EventKind> {
        self.entries.iter().map(|(kind, _)| *kind).collect()
    }

    /// Remove every listener this subscription registered
    pub fn unsubscribe(self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut listeners = inner.listeners.write();
        for (kind, id) in &self.entries {
            if let Some(list) = listeners.get_mut(kind) {
                list.retain(|listener| listener.id != *id);
                if list.is_empty() {
                    listeners.remove(kind);
                }
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kinds", &self.kinds())
            .finish()
    }
}
