//! Host Configuration
//!
//! Where hosts come from and how their credentials are found. Both are
//! consumed through narrow traits so the session layer never touches files.

pub mod credentials;
pub mod hosts;
pub mod ssh_config;

pub use credentials::KeyFileResolver;
pub use hosts::{HostDefaults, HostsFile};
pub use ssh_config::SshConfig;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionOptions;
use crate::transport::PrivateKey;

/// User assumed when a host entry names none
pub const DEFAULT_USER: &str = "root";

/// Connection details for one host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Hostname or IP; falls back to the id when empty
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_bytes: Option<usize>,
}

impl HostEntry {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            ..Default::default()
        }
    }

    /// Address to dial
    pub fn address(&self) -> &str {
        if self.address.is_empty() {
            &self.id
        } else {
            &self.address
        }
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_USER)
    }

    /// Name shown to people
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Source of host entries
pub trait HostDirectory: Send + Sync {
    fn lookup(&self, host_id: &str) -> Option<HostEntry>;

    /// Every known host, in file order
    fn hosts(&self) -> Vec<HostEntry>;
}

/// Resolves authentication material for a host entry
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn private_key(&self, entry: &HostEntry) -> Result<Option<PrivateKey>, ConfigError>;

    fn password(&self, entry: &HostEntry) -> Result<Option<String>, ConfigError>;
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    #[error("Could not determine the {0} directory")]
    NoDirectory(&'static str),
}

/// Build session options for `host_id` from a directory and a resolver
pub async fn session_options_for(
    directory: &dyn HostDirectory,
    resolver: &dyn CredentialResolver,
    host_id: &str,
) -> Result<SessionOptions, ConfigError> {
    let entry = directory
        .lookup(host_id)
        .ok_or_else(|| ConfigError::UnknownHost(host_id.to_string()))?;

    let mut options = SessionOptions::new(entry.address(), entry.user());
    if let Some(port) = entry.port {
        options = options.with_port(port);
    }
    if let Some(key) = resolver.private_key(&entry).await? {
        options = options.with_private_key(key);
    }
    if let Some(password) = resolver.password(&entry)? {
        options = options.with_password(password);
    }
    if let Some(concurrency) = entry.concurrency {
        options = options.with_concurrency(concurrency);
    }
    if let Some(ms) = entry.default_timeout_ms {
        options = options.with_default_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = entry.keepalive_interval_ms {
        let count_max = options.keepalive_count_max;
        options = options.with_keepalive(Duration::from_millis(ms), count_max);
    }
    if let Some(max) = entry.max_output_bytes {
        options = options.with_max_output_bytes(max);
    }
    Ok(options)
}
