//! Session Manager
//!
//! Registry of per-host sessions sharing one connector and one event bus.
//! Sessions are created lazily on first use and reused afterwards.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{info, warn};
use std::sync::Arc;

use super::bus::{EventBus, Subscription};
use super::error::{CommandError, SessionError};
use super::events::{EventFilter, SessionEvent};
use super::handle::Session;
use super::options::SessionOptions;
use super::state::SessionInfo;
use crate::command::{CommandResult, CommandSpec, HostId};
use crate::transport::Connector;

/// Session Manager - owns every host session in the process
pub struct SessionManager {
    /// Live sessions (host id -> session)
    sessions: DashMap<HostId, Session>,
    bus: EventBus,
    connector: Arc<dyn Connector>,
}

impl SessionManager {
    /// Create a manager with its own event bus
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_bus(connector, EventBus::new())
    }

    /// Create a manager publishing on an existing bus
    pub fn with_bus(connector: Arc<dyn Connector>, bus: EventBus) -> Self {
        Self {
            sessions: DashMap::new(),
            bus,
            connector,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Return the live session for `host_id`, or create one, and wait until
    /// it is connected.
    ///
    /// Callers racing on the same host share one connect attempt and see the
    /// same outcome. If the first connect of a new session fails, the session
    /// is removed from the registry and disposed before the error is returned.
    pub async fn ensure_session(
        &self,
        host_id: &str,
        options: SessionOptions,
    ) -> Result<Session, SessionError> {
        let session = match self.sessions.entry(host_id.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_disposed() => {
                let session = entry.get().clone();
                drop(entry);
                session.connect().await?;
                return Ok(session);
            }
            Entry::Occupied(mut entry) => {
                let session = self.spawn(host_id, options);
                entry.insert(session.clone());
                session
            }
            Entry::Vacant(entry) => {
                let session = self.spawn(host_id, options);
                entry.insert(session.clone());
                session
            }
        };

        info!("Created session for host: {}", host_id);

        if let Err(err) = session.connect().await {
            warn!("Initial connect to {} failed: {}", host_id, err);
            self.sessions
                .remove_if(host_id, |_, existing| existing.same_session(&session));
            session.dispose().await;
            return Err(err);
        }
        Ok(session)
    }

    fn spawn(&self, host_id: &str, options: SessionOptions) -> Session {
        Session::spawn(host_id, options, self.connector.clone(), self.bus.clone())
    }

    /// Run one command on `host_id`, creating the session if needed
    pub async fn run_command(
        &self,
        host_id: &str,
        options: SessionOptions,
        spec: CommandSpec,
    ) -> Result<CommandResult, CommandError> {
        let session = self.ensure_session(host_id, options).await?;
        session.enqueue(spec).await
    }

    /// Dispose and forget the session for `host_id`. Returns false if none existed.
    pub async fn close(&self, host_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(host_id) else {
            return false;
        };
        info!("Closing session for host: {}", host_id);
        session.dispose().await;
        true
    }

    /// Listen to every event passing `filter`
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let kinds = filter.event_kinds();
        self.bus.subscribe_many(&kinds, move |event| {
            if filter.matches_scope(event) {
                handler(event);
            }
        })
    }

    /// Get a session by host id
    pub fn get_session(&self, host_id: &str) -> Option<Session> {
        self.sessions.get(host_id).map(|s| s.value().clone())
    }

    /// Registered host ids, sorted
    pub fn hosts(&self) -> Vec<HostId> {
        let mut hosts: Vec<HostId> = self.sessions.iter().map(|s| s.key().clone()).collect();
        hosts.sort();
        hosts
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Info snapshots for every registered session, sorted by host id
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Session> = self.sessions.iter().map(|s| s.value().clone()).collect();
        let mut infos = futures::future::join_all(sessions.iter().map(Session::info)).await;
        infos.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        infos
    }

    /// Dispose every session - for cleanup on exit
    pub async fn shutdown_all(&self) {
        info!("Shutting down all sessions...");

        let sessions: Vec<Session> = self.sessions.iter().map(|s| s.value().clone()).collect();
        self.sessions.clear();
        futures::future::join_all(sessions.iter().map(Session::dispose)).await;

        info!("All sessions shut down");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("hosts", &self.hosts())
            .field("connector", &self.connector.connector_type())
            .finish()
    }
}
