//! Transport Module
//!
//! Remote-shell connections behind narrow traits:
//! - russh-backed connector for real hosts
//! - Key and password authentication
//! - Incremental UTF-8 decoding of channel output
//! - Scripted in-memory transport for tests

pub mod auth;
pub mod connection;
pub mod decode;
pub mod error;
pub mod ssh_client;

#[cfg(test)]
pub mod mock;

pub use auth::{AuthMethod, PrivateKey};
pub use connection::{
    ChannelEvent, Connection, ConnectionEvent, Connector, Established, ExecChannel, ExecRequest,
};
pub use error::{TransportError, TransportResult};
pub use ssh_client::RusshConnector;
