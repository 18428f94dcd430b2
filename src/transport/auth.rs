//! Authentication material for remote-shell connections.
//!
//! Secrets never appear in `Debug` output.

use std::fmt;

/// Private key material in OpenSSH/PEM encoding
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pem: String,
    passphrase: Option<String>,
}

impl PrivateKey {
    /// Create from unencrypted key text
    pub fn new(pem: impl Into<String>) -> Self {
        Self {
            pem: pem.into(),
            passphrase: None,
        }
    }

    /// Set the passphrase protecting the key
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("pem", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One authentication attempt, tried in order until the server accepts
#[derive(Clone)]
pub enum AuthMethod {
    PublicKey(PrivateKey),
    Password(String),
}

impl AuthMethod {
    /// Get auth type name for logging
    pub fn auth_type(&self) -> &'static str {
        match self {
            Self::PublicKey(_) => "publickey",
            Self::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthMethod({})", self.auth_type())
    }
}
