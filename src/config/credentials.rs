//! Credential resolution from key files and environment variables.

use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{ConfigError, CredentialResolver, HostEntry};
use crate::transport::PrivateKey;

/// Reads `identity_file` from disk and the password from `password_env`
#[derive(Debug, Clone, Default)]
pub struct KeyFileResolver {
    home: Option<PathBuf>,
    /// Environment variable holding the key passphrase
    passphrase_env: Option<String>,
}

impl KeyFileResolver {
    pub fn new() -> Self {
        Self {
            home: dirs::home_dir(),
            passphrase_env: None,
        }
    }

    /// Expand `~` against `home` instead of the user's home directory
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_passphrase_env(mut self, var: impl Into<String>) -> Self {
        self.passphrase_env = Some(var.into());
        self
    }

    /// Expand a leading `~` or `~/`
    pub fn expand(&self, path: &Path) -> PathBuf {
        let Ok(rest) = path.strip_prefix("~") else {
            return path.to_path_buf();
        };
        match &self.home {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl CredentialResolver for KeyFileResolver {
    async fn private_key(&self, entry: &HostEntry) -> Result<Option<PrivateKey>, ConfigError> {
        let Some(file) = &entry.identity_file else {
            return Ok(None);
        };
        let path = self.expand(file);
        debug!("Reading identity file {:?} for {}", path, entry.id);

        let pem = fs::read_to_string(&path).await.map_err(|e| ConfigError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let mut key = PrivateKey::new(pem);
        if let Some(var) = &self.passphrase_env {
            if let Ok(passphrase) = std::env::var(var) {
                key = key.with_passphrase(passphrase);
            }
        }
        Ok(Some(key))
    }

    fn password(&self, entry: &HostEntry) -> Result<Option<String>, ConfigError> {
        let Some(var) = &entry.password_env else {
            return Ok(None);
        };
        std::env::var(var)
            .map(Some)
            .map_err(|_| ConfigError::MissingEnv(var.clone()))
    }
}
