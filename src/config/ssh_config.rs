//! OpenSSH config import
//!
//! Read-only view of `~/.ssh/config`. Only `Host`, `HostName`, `User`,
//! `IdentityFile` and `Port` are understood; other directives are skipped.
//! The first token after `Host` becomes the host id and any remaining tokens
//! form its display name.

use log::{debug, warn};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{ConfigError, HostDirectory, HostEntry};

/// Hosts declared in an OpenSSH client config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfig {
    entries: Vec<HostEntry>,
}

impl SshConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".ssh").join("config"))
            .ok_or(ConfigError::NoDirectory("home"))
    }

    /// Load a config file; a missing file yields no hosts
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            debug!("No OpenSSH config at {:?}", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        let mut current: Option<HostEntry> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut tokens = line.split_whitespace();
            let Some(directive) = tokens.next() else {
                continue;
            };
            let value = tokens.collect::<Vec<_>>().join(" ");

            if directive.eq_ignore_ascii_case("host") {
                entries.extend(current.take());
                let mut names = value.split_whitespace();
                let Some(id) = names.next() else {
                    warn!("Ignoring Host line without a name");
                    continue;
                };
                let rest = names.collect::<Vec<_>>().join(" ");
                current = Some(HostEntry {
                    id: id.to_string(),
                    display_name: (!rest.is_empty()).then_some(rest),
                    ..Default::default()
                });
                continue;
            }

            let Some(entry) = current.as_mut() else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match directive.to_ascii_lowercase().as_str() {
                "hostname" => entry.address = value,
                "user" => entry.user = Some(value),
                "identityfile" => entry.identity_file = Some(PathBuf::from(value)),
                "port" => match value.parse::<u16>() {
                    Ok(port) => entry.port = Some(port),
                    Err(_) => warn!("Ignoring invalid port {:?} for host {}", value, entry.id),
                },
                _ => {}
            }
        }

        entries.extend(current);
        Self { entries }
    }
}

impl HostDirectory for SshConfig {
    fn lookup(&self, host_id: &str) -> Option<HostEntry> {
        self.entries.iter().find(|h| h.id == host_id).cloned()
    }

    fn hosts(&self) -> Vec<HostEntry> {
        self.entries.clone()
    }
}
