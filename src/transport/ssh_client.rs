//! SSH transport on top of russh.
//!
//! russh owns the wire protocol and cryptography; this module only maps its
//! handles and channel messages onto the [`Connector`] / [`Connection`] /
//! [`ExecChannel`] traits.

use async_trait::async_trait;
use log::{debug, info, warn};
use russh::client::{self, Handle, Handler};
use russh::{ChannelMsg, Disconnect, Sig};
use russh_keys::key::PublicKey;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};

use super::auth::AuthMethod;
use super::connection::{
    ChannelEvent, Connection, ConnectionEvent, Connector, Established, ExecChannel, ExecRequest,
};
use super::decode::Utf8Decoder;
use super::error::{TransportError, TransportResult};
use crate::session::SessionOptions;

/// Client-side handler; lives inside the russh session task.
///
/// The session task drops it when the connection ends for any reason, which
/// is how loss of the connection reaches the session.
struct ClientHandler {
    host: String,
    port: u16,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => {
                debug!("Host key for {}:{} verified against known_hosts", self.host, self.port);
                Ok(true)
            }
            Ok(false) => {
                warn!(
                    "Host {}:{} not found in known_hosts, accepting (first connection)",
                    self.host, self.port
                );
                Ok(true)
            }
            Err(russh_keys::Error::KeyChanged { .. }) => {
                warn!(
                    "HOST KEY VERIFICATION FAILED for {}:{}: key does not match known_hosts",
                    self.host, self.port
                );
                Ok(false)
            }
            Err(e) => {
                warn!("Could not check known_hosts for {}: {}", self.host, e);
                Ok(true)
            }
        }
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        let _ = self.closed.send(true);
        let _ = self.events.send(ConnectionEvent::Closed { had_error: false });
    }
}

/// Connector producing russh-backed connections
#[derive(Debug, Clone, Default)]
pub struct RusshConnector;

impl RusshConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, host_id: &str, options: &SessionOptions) -> TransportResult<Established> {
        let mut config = client::Config::default();
        config.keepalive_interval = if options.keepalive_interval.is_zero() {
            None
        } else {
            Some(options.keepalive_interval)
        };
        config.keepalive_max = options.keepalive_count_max;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let handler = ClientHandler {
            host: options.host.clone(),
            port: options.port,
            events: events_tx,
            closed: closed_tx,
        };

        debug!(
            "Opening SSH connection for {} to {}@{}:{}",
            host_id, options.username, options.host, options.port
        );

        let mut handle = client::connect(
            Arc::new(config),
            (options.host.as_str(), options.port),
            handler,
        )
        .await
        .map_err(|e| match e {
            russh::Error::IO(io) => TransportError::ConnectionFailed(format!(
                "Failed to connect to {}:{}: {}",
                options.host, options.port, io
            )),
            russh::Error::UnknownKey => TransportError::HostKeyRejected(options.host.clone()),
            other => TransportError::Handshake(other.to_string()),
        })?;

        authenticate(&mut handle, options).await?;

        info!("SSH connection established for {} ({})", host_id, options.host);

        Ok(Established {
            connection: Box::new(RusshConnection {
                host_id: host_id.to_string(),
                handle: RwLock::new(Some(handle)),
                closed: closed_rx,
            }),
            events: events_rx,
        })
    }

    fn connector_type(&self) -> &'static str {
        "russh"
    }
}

/// Try every configured method in order until the server accepts one
async fn authenticate(handle: &mut Handle<ClientHandler>, options: &SessionOptions) -> TransportResult<()> {
    let methods = options.auth_methods();
    if methods.is_empty() {
        return Err(TransportError::AuthenticationFailed(
            "no private key or password configured".to_string(),
        ));
    }

    for method in methods {
        let accepted = match &method {
            AuthMethod::PublicKey(key) => {
                let pair = russh_keys::decode_secret_key(key.pem(), key.passphrase())
                    .map_err(|e| TransportError::InvalidKey(e.to_string()))?;
                handle
                    .authenticate_publickey(options.username.clone(), Arc::new(pair))
                    .await
            }
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(options.username.clone(), password.clone())
                    .await
            }
        }
        .map_err(|e| TransportError::AuthenticationFailed(e.to_string()))?;

        if accepted {
            debug!("Authenticated {} using {}", options.username, method.auth_type());
            return Ok(());
        }
        debug!("Server rejected {} authentication for {}", method.auth_type(), options.username);
    }

    Err(TransportError::AuthenticationFailed(format!(
        "all methods rejected for {}",
        options.username
    )))
}

/// A russh client handle.
///
/// Read lock: opening channels. Write lock: close only.
pub struct RusshConnection {
    host_id: String,
    handle: RwLock<Option<Handle<ClientHandler>>>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl Connection for RusshConnection {
    async fn exec(&self, request: ExecRequest) -> TransportResult<Box<dyn ExecChannel>> {
        let guard = self.handle.read().await;
        let handle = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Channel(format!("Failed to open channel: {}", e)))?;
        drop(guard);

        for (name, value) in &request.env {
            if let Err(e) = channel.set_env(false, name.clone(), value.clone()).await {
                debug!("Server refused env {} for {}: {}", name, self.host_id, e);
            }
        }

        channel
            .exec(true, request.command.clone())
            .await
            .map_err(|e| TransportError::Channel(format!("Failed to execute command: {}", e)))?;

        Ok(Box::new(RusshChannel::new(channel)))
    }

    async fn close(&self, grace: Duration) {
        let Some(handle) = self.handle.write().await.take() else {
            return;
        };

        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "Session disposed", "en")
            .await
        {
            debug!("Disconnect request for {} failed: {}", self.host_id, e);
        }

        let mut closed = self.closed.clone();
        let acknowledged = tokio::time::timeout(grace, closed.wait_for(|c| *c))
            .await
            .is_ok();
        if acknowledged {
            debug!("SSH connection for {} closed", self.host_id);
        } else {
            warn!(
                "SSH connection for {} did not acknowledge close within {:?}, destroying",
                self.host_id, grace
            );
        }
        drop(handle);
    }
}

struct RusshChannel {
    channel: russh::Channel<client::Msg>,
    stdout: Utf8Decoder,
    stderr: Utf8Decoder,
    /// Events produced ahead of the next channel message
    backlog: VecDeque<ChannelEvent>,
}

impl RusshChannel {
    fn new(channel: russh::Channel<client::Msg>) -> Self {
        Self {
            channel,
            stdout: Utf8Decoder::new(),
            stderr: Utf8Decoder::new(),
            backlog: VecDeque::new(),
        }
    }

    /// Queue whatever partial characters are left on either stream
    fn flush_decoders(&mut self) {
        if self.stdout.has_pending() {
            self.backlog.push_back(ChannelEvent::Stdout(self.stdout.finish()));
        }
        if self.stderr.has_pending() {
            self.backlog.push_back(ChannelEvent::Stderr(self.stderr.finish()));
        }
    }
}

#[async_trait]
impl ExecChannel for RusshChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Some(event);
            }

            let Some(message) = self.channel.wait().await else {
                self.flush_decoders();
                return self.backlog.pop_front();
            };

            let event = match message {
                ChannelMsg::Data { data } => match self.stdout.decode(&data) {
                    chunk if chunk.is_empty() => continue,
                    chunk => ChannelEvent::Stdout(chunk),
                },
                ChannelMsg::ExtendedData { data, ext: 1 } => match self.stderr.decode(&data) {
                    chunk if chunk.is_empty() => continue,
                    chunk => ChannelEvent::Stderr(chunk),
                },
                ChannelMsg::ExitStatus { exit_status } => {
                    self.flush_decoders();
                    self.backlog.push_back(ChannelEvent::Exit {
                        code: Some(exit_status),
                        signal: None,
                    });
                    continue;
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    self.flush_decoders();
                    self.backlog.push_back(ChannelEvent::Exit {
                        code: None,
                        signal: Some(format!("{:?}", signal_name)),
                    });
                    continue;
                }
                ChannelMsg::Failure => {
                    ChannelEvent::Error("remote refused the exec request".to_string())
                }
                ChannelMsg::Close => {
                    self.flush_decoders();
                    self.backlog.push_back(ChannelEvent::Closed);
                    continue;
                }
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn interrupt(&mut self) -> TransportResult<()> {
        self.channel
            .signal(Sig::INT)
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.channel
            .close()
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }
}
