//! Session registry
//!
//! The only shared mutable state in the server. Every mutation takes the write lock, so
//! two handshakes can never create diverging bindings for the same identifier.

use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::transport::Transport;

/// Opaque identifier minted by the server during a handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {0} already has a transport bound")]
    AlreadyBound(String),
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    transport: Option<Arc<dyn Transport>>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            transport: None,
        }
    }

    /// A session is live while it has a transport that has not signalled closure.
    pub fn is_live(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| !transport.is_closed())
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a fresh identifier. The session has no transport until [`Self::bind`].
    pub fn create(&self) -> SessionId {
        let mut sessions = self.write();
        loop {
            let id = SessionId::generate();
            if !sessions.contains_key(&id) {
                sessions.insert(id.clone(), Session::new(id.clone()));
                debug!(session_id = %id, "session reserved");
                return id;
            }
        }
    }

    pub fn bind(&self, id: &SessionId, transport: Arc<dyn Transport>) -> Result<(), RegistryError> {
        let mut sessions = self.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if session.transport.is_some() {
            return Err(RegistryError::AlreadyBound(id.to_string()));
        }

        info!(
            session_id = %id,
            transport = ?transport.kind(),
            "session bound"
        );
        session.transport = Some(transport);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<dyn Transport>, RegistryError> {
        self.read()
            .get(id)
            .filter(|session| session.is_live())
            .and_then(|session| session.transport.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Returns the canonical identifier for a live, bound session.
    pub fn resolve(&self, id: &str) -> Result<SessionId, RegistryError> {
        self.read()
            .get(id)
            .filter(|session| session.is_live())
            .map(|session| session.id.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Removes the session and closes its transport. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Session> {
        let removed = self.write().remove(id);

        if let Some(session) = removed.as_ref() {
            if let Some(transport) = session.transport.as_ref() {
                transport.close();
            }
            info!(
                session_id = %session.id,
                age_ms = (Utc::now() - session.created_at).num_milliseconds(),
                "session closed"
            );
        }

        removed
    }

    /// Drops the registry entry but leaves its transport open for the channel to reuse.
    pub fn release(&self, id: &str) -> bool {
        let released = self.write().remove(id);
        if let Some(session) = released.as_ref() {
            debug!(session_id = %session.id, "session released");
        }
        released.is_some()
    }

    /// Removes every session, closing their transports.
    pub fn drain(&self) -> Vec<Session> {
        let drained: Vec<Session> = self.write().drain().map(|(_, session)| session).collect();
        for session in &drained {
            if let Some(transport) = session.transport.as_ref() {
                transport.close();
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}
