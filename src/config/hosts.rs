//! Hosts File
//!
//! TOML host directory, by default at `<config_dir>/sshmux/hosts.toml`:
//!
//! ```toml
//! [defaults]
//! user = "deploy"
//! identity_file = "~/.ssh/id_ed25519"
//!
//! [[hosts]]
//! id = "web-1"
//! address = "10.0.0.5"
//! concurrency = 2
//! ```

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{ConfigError, HostDirectory, HostEntry};

/// Values applied to every host that does not set its own
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
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

/// Parsed hosts file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsFile {
    #[serde(default)]
    pub defaults: HostDefaults,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

impl HostsFile {
    /// Default location of the hosts file
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("sshmux").join("hosts.toml"))
            .ok_or(ConfigError::NoDirectory("config"))
    }

    /// Parse hosts file text
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load a hosts file
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let file = Self::parse(&content, path)?;
        info!("Loaded {} hosts from {:?}", file.hosts.len(), path);
        Ok(file)
    }

    /// Load a hosts file, or `None` if it does not exist
    pub async fn load_if_exists(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            debug!("No hosts file at {:?}", path);
            return Ok(None);
        }
        Self::load(path).await.map(Some)
    }

    /// Write the file, creating parent directories as needed
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |e: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, content).await.map_err(io_error)
    }

    fn with_defaults(&self, entry: &HostEntry) -> HostEntry {
        let d = &self.defaults;
        let mut merged = entry.clone();
        merged.port = merged.port.or(d.port);
        merged.user = merged.user.or_else(|| d.user.clone());
        merged.identity_file = merged.identity_file.or_else(|| d.identity_file.clone());
        merged.password_env = merged.password_env.or_else(|| d.password_env.clone());
        merged.concurrency = merged.concurrency.or(d.concurrency);
        merged.default_timeout_ms = merged.default_timeout_ms.or(d.default_timeout_ms);
        merged.keepalive_interval_ms = merged.keepalive_interval_ms.or(d.keepalive_interval_ms);
        merged.max_output_bytes = merged.max_output_bytes.or(d.max_output_bytes);
        merged
    }
}

impl HostDirectory for HostsFile {
    fn lookup(&self, host_id: &str) -> Option<HostEntry> {
        self.hosts
            .iter()
            .find(|h| h.id == host_id)
            .map(|h| self.with_defaults(h))
    }

    fn hosts(&self) -> Vec<HostEntry> {
        self.hosts.iter().map(|h| self.with_defaults(h)).collect()
    }
}
