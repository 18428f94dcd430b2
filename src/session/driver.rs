//! Session Driver
//!
//! Each session is a single tokio task that owns all of its mutable state
//! (status, queue, in-flight commands, connection) and processes one
//! [`Control`] message at a time. Connection attempts, exec requests, channel
//! reads and timers run in helper tasks that report back through weak
//! senders, so they never keep a dropped session alive.

use chrono::{DateTime, Utc};
use log::{debug, log, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::bus::EventBus;
use super::error::{CommandError, CommandOutcome, SessionError};
use super::events::{LogLevel, SessionEvent};
use super::options::SessionOptions;
use super::state::{SessionInfo, SessionStatus};
use crate::command::{CancelReason, CommandQueue, CommandResult, CommandSpec, HostId, SingleFlight};
use crate::transport::{
    ChannelEvent, Connection, ConnectionEvent, Connector, Established, ExecChannel, ExecRequest,
    TransportError, TransportResult,
};

/// Wait between interrupting a cancelled command and force-closing its channel
const CANCEL_GRACE: Duration = Duration::from_millis(250);
/// Wait for the remote to acknowledge a disconnect on dispose
const DISPOSE_CLOSE_GRACE: Duration = Duration::from_secs(5);

type WeakControl = mpsc::WeakUnboundedSender<Control>;

/// Messages processed by the driver
pub(crate) enum Control {
    Connect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Enqueue {
        pending: PendingCommand,
    },
    Cancel {
        command_id: String,
        reason: CancelReason,
        reply: Option<oneshot::Sender<bool>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionInfo>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
    ConnectFinished {
        result: TransportResult<Established>,
    },
    Connection {
        generation: u64,
        event: ConnectionEvent,
    },
    ExecFailed {
        command_id: String,
        run: u64,
        error: TransportError,
    },
    Channel {
        command_id: String,
        run: u64,
        event: ChannelEvent,
    },
    ReconnectDue,
}

/// Post to the driver if it is still running
fn post(tx: &WeakControl, control: Control) -> bool {
    match tx.upgrade() {
        Some(tx) => tx.send(control).is_ok(),
        None => false,
    }
}

/// A command waiting in the queue
pub(crate) struct PendingCommand {
    pub(crate) id: String,
    pub(crate) spec: CommandSpec,
    reply: Option<oneshot::Sender<CommandOutcome>>,
    abort_listener: Option<JoinHandle<()>>,
}

impl PendingCommand {
    pub(crate) fn new(id: String, spec: CommandSpec, reply: oneshot::Sender<CommandOutcome>) -> Self {
        Self {
            id,
            spec,
            reply: Some(reply),
            abort_listener: None,
        }
    }

    /// Resolve the caller's handle; only the first call has any effect
    fn settle(&mut self, outcome: CommandOutcome) {
        self.detach();
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(outcome);
        }
    }

    fn detach(&mut self) {
        if let Some(listener) = self.abort_listener.take() {
            listener.abort();
        }
    }
}

impl Drop for PendingCommand {
    fn drop(&mut self) {
        self.detach();
    }
}

enum PumpControl {
    Interrupt,
}

/// A command that has been started on the connection
struct ActiveCommand {
    pending: PendingCommand,
    run: u64,
    stdout: String,
    stderr: String,
    truncated: bool,
    started_at: DateTime<Utc>,
    code: Option<u32>,
    signal: Option<String>,
    cancel_reason: Option<CancelReason>,
    channel_error: Option<String>,
    timer: Option<JoinHandle<()>>,
    /// Dropping this closes the pump's channel
    pump: mpsc::UnboundedSender<PumpControl>,
}

impl ActiveCommand {
    fn append_note(&mut self, note: &str) {
        self.stderr.push_str(note);
    }
}

/// Append `chunk` to `buffer` without growing it past `cap`.
/// Returns false if anything was dropped.
fn append_capped(buffer: &mut String, chunk: &str, cap: Option<usize>) -> bool {
    let Some(cap) = cap else {
        buffer.push_str(chunk);
        return true;
    };
    let room = cap.saturating_sub(buffer.len());
    if chunk.len() <= room {
        buffer.push_str(chunk);
        return true;
    }
    let mut cut = room;
    while !chunk.is_char_boundary(cut) {
        cut -= 1;
    }
    buffer.push_str(&chunk[..cut]);
    false
}

/// How an in-flight command reached settlement
enum Finish {
    /// Channel closed normally
    Closed,
    /// Exec could not be started
    Failed(String),
    /// Settled by the session without waiting for the channel
    Forced,
}

/// Everything the driver task owns
pub(crate) struct SessionDriver {
    host_id: HostId,
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    self_tx: WeakControl,
    status: SessionStatus,
    status_tx: watch::Sender<SessionStatus>,
    disposed: bool,
    disposed_flag: Arc<AtomicBool>,
    queue: CommandQueue<PendingCommand>,
    active: HashMap<String, ActiveCommand>,
    connection: Option<Arc<dyn Connection>>,
    generation: u64,
    flight: SingleFlight<Result<(), SessionError>>,
    connect_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    reconnect_attempts: u32,
    next_run: u64,
}

impl SessionDriver {
    pub(crate) fn new(
        host_id: HostId,
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        bus: EventBus,
        self_tx: WeakControl,
        status_tx: watch::Sender<SessionStatus>,
        disposed_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            host_id,
            options,
            connector,
            bus,
            self_tx,
            status: SessionStatus::Closed,
            status_tx,
            disposed: false,
            disposed_flag,
            queue: CommandQueue::new(),
            active: HashMap::new(),
            connection: None,
            generation: 0,
            flight: SingleFlight::new(),
            connect_task: None,
            reconnect_timer: None,
            reconnect_attempts: 0,
            next_run: 0,
        }
    }

    /// Process control messages until disposed or every handle is dropped
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Control>) {
        debug!("Session driver started for {}", self.host_id);

        while let Some(control) = rx.recv().await {
            if let Control::Dispose { reply } = control {
                self.dispose().await;
                let _ = reply.send(());
                break;
            }
            self.handle(control);
        }

        // Every handle dropped without an explicit dispose
        self.dispose().await;
        debug!("Session driver stopped for {}", self.host_id);
    }

    fn handle(&mut self, control: Control) {
        match control {
            Control::Connect { reply } => self.connect(reply),
            Control::Enqueue { pending } => self.enqueue(pending),
            Control::Cancel {
                command_id,
                reason,
                reply,
            } => {
                let found = self.cancel(&command_id, reason);
                if let Some(reply) = reply {
                    let _ = reply.send(found);
                }
            }
            Control::Snapshot { reply } => {
                let _ = reply.send(self.info());
            }
            Control::Dispose { .. } => {}
            Control::ConnectFinished { result } => self.connect_finished(result),
            Control::Connection { generation, event } => {
                if generation == self.generation && self.connection.is_some() {
                    self.connection_lost(event);
                }
            }
            Control::ExecFailed {
                command_id,
                run,
                error,
            } => {
                if self.active.get(&command_id).is_some_and(|a| a.run == run) {
                    self.emit_log(
                        LogLevel::Error,
                        "Failed to execute command",
                        Some(json!({ "commandId": command_id, "error": error.to_string() })),
                    );
                    self.finalize(&command_id, Finish::Failed(error.to_string()));
                }
            }
            Control::Channel {
                command_id,
                run,
                event,
            } => self.channel_event(command_id, run, event),
            Control::ReconnectDue => self.reconnect_due(),
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            host_id: self.host_id.clone(),
            status: self.status,
            queued: self.queue.len(),
            in_flight: self.active.len(),
            reconnect_attempts: self.reconnect_attempts,
            concurrency: self.options.concurrency_limit(),
            disposed: self.disposed,
        }
    }

    // Connection lifecycle

    fn connect(&mut self, reply: oneshot::Sender<Result<(), SessionError>>) {
        if self.status == SessionStatus::Ready && self.connection.is_some() {
            let _ = reply.send(Ok(()));
            return;
        }
        if self.flight.join(reply) {
            self.start_connect();
        }
    }

    fn ensure_connection(&mut self) {
        if self.disposed || self.connection.is_some() {
            return;
        }
        if self.flight.begin() {
            self.start_connect();
        }
    }

    fn start_connect(&mut self) {
        self.update_status(SessionStatus::Connecting);
        self.emit_log(
            LogLevel::Debug,
            "Attempting SSH connection",
            Some(json!({
                "host": self.options.host,
                "port": self.options.port,
                "username": self.options.username,
                "connector": self.connector.connector_type(),
            })),
        );

        let connector = self.connector.clone();
        let options = self.options.clone();
        let host_id = self.host_id.clone();
        let tx = self.self_tx.clone();
        let limit = options.connect_timeout();

        self.connect_task = Some(tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, connector.connect(&host_id, &options)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::ConnectionTimeout(limit.as_millis() as u64)),
            };
            post(&tx, Control::ConnectFinished { result });
        }));
    }

    fn connect_finished(&mut self, result: TransportResult<Established>) {
        self.connect_task = None;
        match result {
            Ok(established) => {
                if let Some(timer) = self.reconnect_timer.take() {
                    timer.abort();
                }
                self.generation += 1;
                self.watch_connection(self.generation, established.events);
                self.connection = Some(Arc::from(established.connection));
                self.reconnect_attempts = 0;
                self.emit_log(LogLevel::Info, "SSH session ready", None);
                self.update_status(SessionStatus::Ready);
                self.flight.complete(Ok(()));
                self.drain();
            }
            Err(error) => {
                self.emit_log(
                    LogLevel::Error,
                    "SSH connection failed",
                    Some(json!({ "error": error.to_string() })),
                );
                self.update_status(SessionStatus::Error);
                self.flight.complete(Err(SessionError::Connect {
                    host_id: self.host_id.clone(),
                    source: error,
                }));
                self.schedule_reconnect();
            }
        }
    }

    /// Forward unsolicited connection events, tagged with the connection generation
    fn watch_connection(&self, generation: u64, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !post(&tx, Control::Connection { generation, event }) {
                    break;
                }
            }
        });
    }

    fn connection_lost(&mut self, event: ConnectionEvent) {
        let (level, note) = match event {
            ConnectionEvent::Error(message) => (LogLevel::Error, message),
            ConnectionEvent::Closed { had_error } => (
                if had_error { LogLevel::Error } else { LogLevel::Warn },
                "Connection lost".to_string(),
            ),
        };
        self.emit_log(level, "SSH connection closed", Some(json!({ "reason": note })));

        self.connection = None;
        self.update_status(SessionStatus::Degraded);

        let running: Vec<String> = self.active.keys().cloned().collect();
        for command_id in running {
            self.force_cancel(&command_id, CancelReason::ConnectionLost, &note);
        }

        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.disposed || self.reconnect_timer.is_some() {
            return;
        }

        let delay = self.options.reconnect_backoff.delay_for(self.reconnect_attempts);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.emit_log(
            LogLevel::Warn,
            "Scheduling reconnect attempt",
            Some(json!({
                "attempt": self.reconnect_attempts,
                "delayMs": delay.as_millis() as u64,
            })),
        );

        let tx = self.self_tx.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            post(&tx, Control::ReconnectDue);
        }));
    }

    fn reconnect_due(&mut self) {
        self.reconnect_timer = None;
        if self.disposed || self.connection.is_some() {
            return;
        }
        self.emit_log(
            LogLevel::Info,
            "Attempting SSH reconnect",
            Some(json!({ "attempt": self.reconnect_attempts })),
        );
        if self.flight.begin() {
            self.start_connect();
        }
    }

    // Commands

    fn enqueue(&mut self, mut pending: PendingCommand) {
        let command_id = pending.id.clone();

        if self.queue.iter().any(|p| p.id == command_id) || self.active.contains_key(&command_id) {
            warn!("Rejecting duplicate command id {} on {}", command_id, self.host_id);
            pending.settle(Err(CommandError::DuplicateId(command_id)));
            return;
        }

        if let Some(signal) = pending.spec.abort.clone() {
            let tx = self.self_tx.clone();
            let id = command_id.clone();
            pending.abort_listener = Some(tokio::spawn(async move {
                signal.aborted().await;
                post(
                    &tx,
                    Control::Cancel {
                        command_id: id,
                        reason: CancelReason::Abort,
                        reply: None,
                    },
                );
            }));
        }

        let priority = pending.spec.priority;
        let command = pending.spec.command.clone();
        self.queue.enqueue(pending, priority);

        self.bus.emit(&SessionEvent::Queued {
            host_id: self.host_id.clone(),
            command_id,
            command,
        });

        self.ensure_connection();
        self.drain();
    }

    /// Start queued commands while below the concurrency limit
    fn drain(&mut self) {
        if self.disposed || self.status != SessionStatus::Ready {
            return;
        }
        let Some(connection) = self.connection.clone() else {
            return;
        };

        while self.active.len() < self.options.concurrency_limit() {
            let Some(pending) = self.queue.dequeue() else {
                break;
            };
            self.start(pending, connection.clone());
        }
    }

    fn start(&mut self, pending: PendingCommand, connection: Arc<dyn Connection>) {
        let command_id = pending.id.clone();
        self.next_run += 1;
        let run = self.next_run;

        let (pump_tx, pump_rx) = mpsc::unbounded_channel();
        let request = ExecRequest {
            command: pending.spec.command_line(),
            env: pending.spec.env.clone(),
        };
        let command = pending.spec.command.clone();

        let timer = pending
            .spec
            .effective_timeout(self.options.default_timeout)
            .map(|limit| {
                let tx = self.self_tx.clone();
                let id = command_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(limit).await;
                    post(
                        &tx,
                        Control::Cancel {
                            command_id: id,
                            reason: CancelReason::Timeout,
                            reply: None,
                        },
                    );
                })
            });

        self.active.insert(
            command_id.clone(),
            ActiveCommand {
                pending,
                run,
                stdout: String::new(),
                stderr: String::new(),
                truncated: false,
                started_at: Utc::now(),
                code: None,
                signal: None,
                cancel_reason: None,
                channel_error: None,
                timer,
                pump: pump_tx,
            },
        );

        self.bus.emit(&SessionEvent::Started {
            host_id: self.host_id.clone(),
            command_id: command_id.clone(),
            command,
        });

        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            match connection.exec(request).await {
                Ok(channel) => pump(command_id, run, channel, pump_rx, tx).await,
                Err(error) => {
                    post(
                        &tx,
                        Control::ExecFailed {
                            command_id,
                            run,
                            error,
                        },
                    );
                }
            }
        });
    }

    fn channel_event(&mut self, command_id: String, run: u64, event: ChannelEvent) {
        let cap = self.options.max_output_bytes;
        let Some(active) = self.active.get_mut(&command_id).filter(|a| a.run == run) else {
            return;
        };

        match event {
            ChannelEvent::Stdout(chunk) => {
                if !append_capped(&mut active.stdout, &chunk, cap) {
                    active.truncated = true;
                }
                self.bus.emit(&SessionEvent::Stdout {
                    host_id: self.host_id.clone(),
                    command_id,
                    chunk,
                });
            }
            ChannelEvent::Stderr(chunk) => {
                if !append_capped(&mut active.stderr, &chunk, cap) {
                    active.truncated = true;
                }
                self.bus.emit(&SessionEvent::Stderr {
                    host_id: self.host_id.clone(),
                    command_id,
                    chunk,
                });
            }
            ChannelEvent::Exit { code, signal } => {
                active.code = code;
                active.signal = signal;
            }
            ChannelEvent::Error(message) => {
                active.append_note(&message);
                active.channel_error = Some(message.clone());
                self.emit_log(
                    LogLevel::Error,
                    "Command channel error",
                    Some(json!({ "commandId": command_id, "error": message })),
                );
            }
            ChannelEvent::Closed => self.finalize(&command_id, Finish::Closed),
        }
    }

    /// Cancel a queued or running command. Returns false if unknown.
    fn cancel(&mut self, command_id: &str, reason: CancelReason) -> bool {
        if let Some(mut pending) = self.queue.remove(|p| p.id == command_id) {
            self.emit_cancelled(command_id, reason);
            pending.settle(Err(CommandError::cancelled(command_id, reason)));
            return true;
        }

        let Some(active) = self.active.get_mut(command_id) else {
            return false;
        };
        if active.cancel_reason.is_some() {
            return true;
        }

        active.cancel_reason = Some(reason);
        active.append_note(&format!("Command cancelled ({}).", reason));
        let _ = active.pump.send(PumpControl::Interrupt);

        self.emit_cancelled(command_id, reason);
        self.emit_log(
            LogLevel::Info,
            "Cancelling running command",
            Some(json!({ "commandId": command_id, "reason": reason })),
        );
        true
    }

    /// Settle a running command now; its channel is closed behind it
    fn force_cancel(&mut self, command_id: &str, reason: CancelReason, note: &str) {
        let Some(active) = self.active.get_mut(command_id) else {
            return;
        };
        active.cancel_reason = Some(reason);
        active.append_note(note);

        self.emit_cancelled(command_id, reason);
        self.finalize(command_id, Finish::Forced);
    }

    /// Single settlement path for started commands
    fn finalize(&mut self, command_id: &str, finish: Finish) {
        let Some(mut active) = self.active.remove(command_id) else {
            return;
        };
        if let Some(timer) = active.timer.take() {
            timer.abort();
        }

        let failure = match finish {
            Finish::Failed(message) => {
                active.append_note(&message);
                Some(message)
            }
            Finish::Closed | Finish::Forced => active.channel_error.take(),
        };

        let result = CommandResult {
            id: command_id.to_string(),
            code: active.code,
            signal: active.signal.take(),
            stdout: std::mem::take(&mut active.stdout),
            stderr: std::mem::take(&mut active.stderr),
            truncated: active.truncated,
            started_at: active.started_at,
            ended_at: Utc::now(),
        };

        let outcome = if let Some(reason) = active.cancel_reason {
            Err(CommandError::Cancelled {
                command_id: command_id.to_string(),
                reason,
                result: Some(Box::new(result.clone())),
            })
        } else if let Some(message) = failure {
            Err(CommandError::Execution {
                command_id: command_id.to_string(),
                message,
                result: Some(Box::new(result.clone())),
            })
        } else {
            Ok(result.clone())
        };

        debug!(
            "Command {} on {} settled: code={:?} cancelled={:?} ({}ms)",
            command_id,
            self.host_id,
            result.code,
            active.cancel_reason,
            result.duration_ms()
        );

        self.bus.emit(&SessionEvent::Ended {
            host_id: self.host_id.clone(),
            command_id: command_id.to_string(),
            result,
        });
        active.pending.settle(outcome);
        drop(active);

        self.drain();
    }

    // Disposal

    async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.disposed_flag.store(true, Ordering::SeqCst);

        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }

        self.emit_log(LogLevel::Info, "Disposing SSH session", None);

        for mut pending in self.queue.clear() {
            self.emit_cancelled(&pending.id, CancelReason::SessionDisposed);
            let command_id = pending.id.clone();
            pending.settle(Err(CommandError::cancelled(command_id, CancelReason::SessionDisposed)));
        }

        let running: Vec<String> = self.active.keys().cloned().collect();
        for command_id in running {
            self.force_cancel(&command_id, CancelReason::SessionDisposed, "Session disposed.");
        }

        self.flight.complete(Err(SessionError::Disposed));

        if let Some(connection) = self.connection.take() {
            connection.close(DISPOSE_CLOSE_GRACE).await;
        }

        self.update_status(SessionStatus::Closed);
    }

    // Observability

    fn update_status(&mut self, status: SessionStatus) {
        if self.status == status {
            return;
        }
        debug!("Session {} status {} -> {}", self.host_id, self.status, status);
        self.status = status;
        self.status_tx.send_replace(status);
        self.bus.emit(&SessionEvent::Status {
            host_id: self.host_id.clone(),
            status,
        });
    }

    fn emit_cancelled(&self, command_id: &str, reason: CancelReason) {
        self.bus.emit(&SessionEvent::Cancelled {
            host_id: self.host_id.clone(),
            command_id: command_id.to_string(),
            reason,
        });
    }

    /// Publish a `session:log` event and mirror it to the process log
    fn emit_log(&self, level: LogLevel, message: &str, meta: Option<serde_json::Value>) {
        match &meta {
            Some(meta) => log!(log::Level::from(level), "[{}] {} {}", self.host_id, message, meta),
            None => log!(log::Level::from(level), "[{}] {}", self.host_id, message),
        }
        self.bus.emit(&SessionEvent::Log {
            host_id: self.host_id.clone(),
            level,
            message: message.to_string(),
            meta,
        });
    }
}

/// Own one execution channel: forward its events to the driver and apply
/// interrupt requests. Once interrupted, the channel gets `CANCEL_GRACE` to
/// close on its own before it is closed from this side. The driver dropping
/// its end of `control` closes the channel.
async fn pump(
    command_id: String,
    run: u64,
    mut channel: Box<dyn ExecChannel>,
    mut control: mpsc::UnboundedReceiver<PumpControl>,
    tx: WeakControl,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let grace_at = deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            event = channel.next_event() => {
                let event = event.unwrap_or(ChannelEvent::Closed);
                let closed = event == ChannelEvent::Closed;
                let delivered = post(&tx, Control::Channel {
                    command_id: command_id.clone(),
                    run,
                    event,
                });
                if closed || !delivered {
                    break;
                }
            }
            request = control.recv() => match request {
                Some(PumpControl::Interrupt) => {
                    if let Err(e) = channel.interrupt().await {
                        debug!("Interrupt for command {} failed: {}", command_id, e);
                    }
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + CANCEL_GRACE);
                    }
                }
                None => {
                    if let Err(e) = channel.close().await {
                        debug!("Closing channel for command {} failed: {}", command_id, e);
                    }
                    break;
                }
            },
            _ = tokio::time::sleep_until(grace_at), if deadline.is_some() => {
                debug!("Command {} still running after interrupt, closing channel", command_id);
                if let Err(e) = channel.close().await {
                    debug!("Closing channel for command {} failed: {}", command_id, e);
                }
                post(&tx, Control::Channel {
                    command_id: command_id.clone(),
                    run,
                    event: ChannelEvent::Closed,
                });
                break;
            }
        }
    }
}
