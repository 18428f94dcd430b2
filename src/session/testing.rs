//! Helpers shared by the session tests.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::bus::{EventBus, Subscription};
use super::events::{EventKind, LogLevel, SessionEvent};
use super::handle::Session;
use super::options::{BackoffConfig, SessionOptions};
use super::state::SessionStatus;

pub fn options() -> SessionOptions {
    SessionOptions::new("10.0.0.1", "deploy")
        .with_password("pw")
        .with_reconnect_backoff(BackoffConfig {
            base: Duration::from_millis(10),
            max: Duration::from_millis(100),
            factor: 2.0,
        })
}

/// Records every event published on a bus
pub struct Recorder {
    events: Arc<Mutex<Vec<SessionEvent>>>,
    _subscription: Subscription,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscription = bus.subscribe_many(&EventKind::ALL, {
            let events = events.clone();
            move |event| events.lock().push(event.clone())
        });
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Position of the first event of `kind` for `command_id`
    pub fn position(&self, kind: EventKind, command_id: &str) -> Option<usize> {
        self.events
            .lock()
            .iter()
            .position(|e| e.kind() == kind && e.command_id() == Some(command_id))
    }

    /// Command text of every start event, in order
    pub fn started(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Started { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Status { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    /// Attempt numbers announced by reconnect scheduling
    pub fn reconnect_attempts(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Log {
                    level: LogLevel::Warn,
                    message,
                    meta: Some(meta),
                    ..
                } if message == "Scheduling reconnect attempt" => meta["attempt"].as_u64(),
                _ => None,
            })
            .collect()
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_status(session: &Session, status: SessionStatus) {
    let mut rx = session.watch_status();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == status))
        .await
        .expect("status not reached")
        .expect("session driver stopped");
}
