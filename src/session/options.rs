//! Session Options
//!
//! Connection parameters and tuning knobs for one host's session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::transport::{AuthMethod, PrivateKey};

const DEFAULT_PORT: u16 = 22;
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_KEEPALIVE_COUNT_MAX: usize = 5;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exponential reconnect backoff
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(15),
            factor: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (zero-based), capped at `max`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt.min(i32::MAX as u32) as i32);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Everything a session needs to reach and drive one host
#[derive(Clone)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key: Option<PrivateKey>,
    pub password: Option<String>,
    pub keepalive_interval: Duration,
    pub keepalive_count_max: usize,
    pub reconnect_backoff: BackoffConfig,
    /// Maximum simultaneously running commands, at least 1
    pub concurrency: usize,
    /// Per-command timeout when the command sets none; zero disables
    pub default_timeout: Duration,
    /// Per-stream buffer cap; `None` buffers everything
    pub max_output_bytes: Option<usize>,
}

impl SessionOptions {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            private_key: None,
            password: None,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_count_max: DEFAULT_KEEPALIVE_COUNT_MAX,
            reconnect_backoff: BackoffConfig::default(),
            concurrency: 1,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_output_bytes: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_private_key(mut self, key: PrivateKey) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_keepalive(mut self, interval: Duration, count_max: usize) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_count_max = count_max;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Set the concurrency limit (clamped to at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = Some(max);
        self
    }

    /// Effective concurrency limit
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Hard ceiling on connection establishment
    pub fn connect_timeout(&self) -> Duration {
        self.default_timeout.max(MIN_CONNECT_TIMEOUT)
    }

    /// Authentication attempts in order: key first, then password
    pub fn auth_methods(&self) -> Vec<AuthMethod> {
        let mut methods = Vec::new();
        if let Some(key) = &self.private_key {
            methods.push(AuthMethod::PublicKey(key.clone()));
        }
        if let Some(password) = &self.password {
            methods.push(AuthMethod::Password(password.clone()));
        }
        methods
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key", &self.private_key)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keepalive_interval", &self.keepalive_interval)
            .field("keepalive_count_max", &self.keepalive_count_max)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .field("concurrency", &self.concurrency)
            .field("default_timeout", &self.default_timeout)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish()
    }
}
