//! Scripted in-memory transport used by the session tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::connection::{
    ChannelEvent, Connection, ConnectionEvent, Connector, Established, ExecChannel, ExecRequest,
};
use super::error::{TransportError, TransportResult};
use crate::session::SessionOptions;

#[derive(Default)]
struct MockState {
    connect_failures: VecDeque<String>,
    exec_failures: VecDeque<String>,
    connect_delay: Option<Duration>,
    connects: usize,
    closes: usize,
    live: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

/// Connector whose behaviour is driven by the test
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    channels_tx: mpsc::UnboundedSender<ChannelController>,
    channels_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelController>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        let (channels_tx, channels_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            state: Arc::new(Mutex::new(MockState::default())),
            channels_tx,
            channels_rx: tokio::sync::Mutex::new(channels_rx),
        })
    }

    /// Make the next connection attempt fail
    pub fn fail_next_connect(&self, message: &str) {
        self.state.lock().connect_failures.push_back(message.to_string());
    }

    /// Make the next exec request fail
    pub fn fail_next_exec(&self, message: &str) {
        self.state.lock().exec_failures.push_back(message.to_string());
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Simulate the remote end dropping the most recent connection
    pub fn drop_connection(&self) {
        if let Some(events) = self.state.lock().live.last() {
            let _ = events.send(ConnectionEvent::Closed { had_error: true });
        }
    }

    /// Simulate a transport error on the most recent connection
    pub fn connection_error(&self, message: &str) {
        if let Some(events) = self.state.lock().live.last() {
            let _ = events.send(ConnectionEvent::Error(message.to_string()));
        }
    }

    /// Wait for the session to open its next execution channel
    pub async fn next_channel(&self) -> ChannelController {
        let mut rx = self.channels_rx.lock().await;
        match tokio::time::timeout(Duration::from_secs(30), rx.recv()).await {
            Ok(Some(controller)) => controller,
            _ => panic!("no execution channel was opened"),
        }
    }

    /// Non-blocking check for an opened channel
    pub fn try_next_channel(&self) -> Option<ChannelController> {
        self.channels_rx.try_lock().ok()?.try_recv().ok()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _host_id: &str, _options: &SessionOptions) -> TransportResult<Established> {
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.connects += 1;
            (state.connect_delay, state.connect_failures.pop_front())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(TransportError::ConnectionFailed(message));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.state.lock().live.push(events_tx);

        Ok(Established {
            connection: Box::new(MockConnection {
                state: self.state.clone(),
                channels_tx: self.channels_tx.clone(),
            }),
            events: events_rx,
        })
    }

    fn connector_type(&self) -> &'static str {
        "mock"
    }
}

struct MockConnection {
    state: Arc<Mutex<MockState>>,
    channels_tx: mpsc::UnboundedSender<ChannelController>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn exec(&self, request: ExecRequest) -> TransportResult<Box<dyn ExecChannel>> {
        if let Some(message) = self.state.lock().exec_failures.pop_front() {
            return Err(TransportError::Channel(message));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ChannelShared {
            interrupts: AtomicUsize::new(0),
            client_closed: AtomicBool::new(false),
            events_tx: events_tx.clone(),
        });

        let _ = self.channels_tx.send(ChannelController {
            command: request.command.clone(),
            env: request.env.clone(),
            events: events_tx,
            shared: shared.clone(),
        });

        Ok(Box::new(MockChannel {
            events: events_rx,
            shared,
        }))
    }

    async fn close(&self, _grace: Duration) {
        self.state.lock().closes += 1;
    }
}

struct ChannelShared {
    interrupts: AtomicUsize,
    client_closed: AtomicBool,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
}

struct MockChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    shared: Arc<ChannelShared>,
}

#[async_trait]
impl ExecChannel for MockChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    async fn interrupt(&mut self) -> TransportResult<()> {
        self.shared.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        if !self.shared.client_closed.swap(true, Ordering::SeqCst) {
            let _ = self.shared.events_tx.send(ChannelEvent::Closed);
        }
        Ok(())
    }
}

/// Test-side view of one execution channel
pub struct ChannelController {
    pub command: String,
    pub env: HashMap<String, String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shared: Arc<ChannelShared>,
}

impl ChannelController {
    pub fn stdout(&self, chunk: &str) {
        let _ = self.events.send(ChannelEvent::Stdout(chunk.to_string()));
    }

    pub fn stderr(&self, chunk: &str) {
        let _ = self.events.send(ChannelEvent::Stderr(chunk.to_string()));
    }

    pub fn error(&self, message: &str) {
        let _ = self.events.send(ChannelEvent::Error(message.to_string()));
    }

    pub fn exit(&self, code: u32) {
        let _ = self.events.send(ChannelEvent::Exit {
            code: Some(code),
            signal: None,
        });
    }

    pub fn close(&self) {
        let _ = self.events.send(ChannelEvent::Closed);
    }

    /// Exit with `code` and close
    pub fn finish(&self, code: u32) {
        self.exit(code);
        self.close();
    }

    pub fn interrupts(&self) -> usize {
        self.shared.interrupts.load(Ordering::SeqCst)
    }

    pub fn closed_by_client(&self) -> bool {
        self.shared.client_closed.load(Ordering::SeqCst)
    }
}
