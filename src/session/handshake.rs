//! Per-channel handshake state machine
//!
//! A channel starts `Unbound`. The first admitted message either resumes an existing
//! session (the client presented a known identifier) or, for an `initialize` request
//! without an identifier, mints a new session and binds the channel's transport to it.
//! Once `Bound`, a second `initialize` is refused. Termination moves the channel to the
//! terminal `Closed` state and removes the session from the registry.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::session::registry::{SessionId, SessionRegistry};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid or expired session: {0}")]
    InvalidSession(String),
    #[error("Bad Request: No valid session ID provided")]
    BadRequest,
    #[error("session {0} is already initialized")]
    AlreadyBound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Unbound,
    Bound(SessionId),
    Closed,
}

/// How a message was admitted onto a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The message performed the handshake and created this session.
    Established(SessionId),
    /// The message belongs to an already established session.
    Resumed(SessionId),
}

impl Admission {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Established(id) | Self::Resumed(id) => id,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established(_))
    }
}

#[derive(Debug)]
pub struct HandshakeController {
    registry: Arc<SessionRegistry>,
    state: ChannelState,
}

impl HandshakeController {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            state: ChannelState::Unbound,
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Admits one inbound message.
    ///
    /// `presented` is the session identifier the message carries, if any. `transport` is
    /// only invoked when a new session must be bound.
    pub fn admit<F>(
        &mut self,
        presented: Option<&str>,
        is_initialize: bool,
        transport: F,
    ) -> Result<Admission, SessionError>
    where
        F: FnOnce() -> Arc<dyn Transport>,
    {
        match self.state.clone() {
            ChannelState::Closed => Err(SessionError::InvalidSession(
                presented.unwrap_or_default().to_string(),
            )),
            ChannelState::Bound(bound) => {
                if presented.is_some_and(|id| id != bound.as_str()) {
                    return Err(SessionError::InvalidSession(
                        presented.unwrap_or_default().to_string(),
                    ));
                }
                if self.registry.resolve(bound.as_str()).is_err() {
                    self.state = ChannelState::Closed;
                    return Err(SessionError::InvalidSession(bound.to_string()));
                }
                if is_initialize {
                    warn!(session_id = %bound, "repeated initialize rejected");
                    return Err(SessionError::AlreadyBound(bound.to_string()));
                }
                Ok(Admission::Resumed(bound))
            }
            ChannelState::Unbound => match presented {
                Some(id) => {
                    let id = self
                        .registry
                        .resolve(id)
                        .map_err(|_| SessionError::InvalidSession(id.to_string()))?;
                    if is_initialize {
                        warn!(session_id = %id, "initialize on established session rejected");
                        return Err(SessionError::AlreadyBound(id.to_string()));
                    }
                    self.state = ChannelState::Bound(id.clone());
                    Ok(Admission::Resumed(id))
                }
                None if is_initialize => {
                    let id = self.registry.create();
                    if let Err(err) = self.registry.bind(&id, transport()) {
                        error!(session_id = %id, error = %err, "fresh session could not be bound");
                        self.registry.remove(id.as_str());
                        return Err(SessionError::AlreadyBound(id.to_string()));
                    }
                    info!(session_id = %id, "session initialized");
                    self.state = ChannelState::Bound(id.clone());
                    Ok(Admission::Established(id))
                }
                None => Err(SessionError::BadRequest),
            },
        }
    }

    /// Rolls back a handshake whose `initialize` failed, returning the channel to `Unbound`.
    /// The channel's transport stays open so the client can retry on it.
    pub fn abandon(&mut self) -> bool {
        match std::mem::replace(&mut self.state, ChannelState::Unbound) {
            ChannelState::Bound(id) => {
                info!(session_id = %id, "failed handshake rolled back");
                self.registry.release(id.as_str())
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    /// Closes the channel for good. Returns whether this call removed the session.
    pub fn terminate(&mut self) -> bool {
        match std::mem::replace(&mut self.state, ChannelState::Closed) {
            ChannelState::Bound(id) => self.registry.remove(id.as_str()).is_some(),
            ChannelState::Unbound | ChannelState::Closed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::transport::http::HttpTransport;

    fn http() -> Arc<dyn Transport> {
        Arc::new(HttpTransport::new())
    }

    fn controller(registry: &Arc<SessionRegistry>) -> HandshakeController {
        HandshakeController::new(Arc::clone(registry))
    }

    #[test]
    fn initialize_without_session_establishes_one() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);

        let admission = channel.admit(None, true, http).expect("handshake");

        assert!(admission.is_established());
        assert_eq!(
            channel.state(),
            &ChannelState::Bound(admission.session_id().clone())
        );
        assert!(registry.lookup(admission.session_id().as_str()).is_ok());
    }

    #[test]
    fn handshakes_on_distinct_channels_issue_distinct_ids() {
        let registry = Arc::new(SessionRegistry::new());
        let ids: HashSet<SessionId> = (0..100)
            .map(|_| {
                controller(&registry)
                    .admit(None, true, http)
                    .expect("handshake")
                    .session_id()
                    .clone()
            })
            .collect();

        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn non_initialize_without_session_is_bad_request() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);

        assert_eq!(
            channel.admit(None, false, http),
            Err(SessionError::BadRequest)
        );
        assert_eq!(channel.state(), &ChannelState::Unbound);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_session_is_rejected_and_channel_stays_unbound() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);

        assert_eq!(
            channel.admit(Some("does-not-exist"), false, http),
            Err(SessionError::InvalidSession("does-not-exist".to_string()))
        );
        assert_eq!(channel.state(), &ChannelState::Unbound);

        let retried = channel.admit(None, true, http).expect("corrected retry");
        assert!(retried.is_established());
    }

    #[test]
    fn known_session_is_resumed_on_a_new_channel() {
        let registry = Arc::new(SessionRegistry::new());
        let id = controller(&registry)
            .admit(None, true, http)
            .expect("handshake")
            .session_id()
            .clone();

        let mut channel = controller(&registry);
        let admission = channel
            .admit(Some(id.as_str()), false, http)
            .expect("resume");

        assert_eq!(admission, Admission::Resumed(id.clone()));
        assert_eq!(channel.state(), &ChannelState::Bound(id));
    }

    #[test]
    fn second_initialize_on_bound_channel_is_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);
        let id = channel
            .admit(None, true, http)
            .expect("handshake")
            .session_id()
            .clone();

        assert_eq!(
            channel.admit(None, true, http),
            Err(SessionError::AlreadyBound(id.to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn initialize_presenting_known_session_is_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let id = controller(&registry)
            .admit(None, true, http)
            .expect("handshake")
            .session_id()
            .clone();

        let mut channel = controller(&registry);
        assert_eq!(
            channel.admit(Some(id.as_str()), true, http),
            Err(SessionError::AlreadyBound(id.to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn bound_channel_rejects_foreign_session_id() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);
        channel.admit(None, true, http).expect("handshake");

        assert!(matches!(
            channel.admit(Some("someone-else"), false, http),
            Err(SessionError::InvalidSession(_))
        ));
    }

    #[test]
    fn terminate_removes_session_exactly_once() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);
        let id = channel
            .admit(None, true, http)
            .expect("handshake")
            .session_id()
            .clone();

        assert!(channel.terminate());
        assert!(!channel.terminate());
        assert!(registry.lookup(id.as_str()).is_err());
        assert_eq!(channel.state(), &ChannelState::Closed);
        assert!(matches!(
            channel.admit(None, false, http),
            Err(SessionError::InvalidSession(_))
        ));
    }

    #[test]
    fn externally_removed_session_closes_the_channel() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);
        let id = channel
            .admit(None, true, http)
            .expect("handshake")
            .session_id()
            .clone();

        registry.remove(id.as_str());

        assert!(matches!(
            channel.admit(None, false, http),
            Err(SessionError::InvalidSession(_))
        ));
        assert_eq!(channel.state(), &ChannelState::Closed);
        assert!(!channel.terminate());
    }

    #[test]
    fn abandon_rolls_back_a_failed_handshake() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);
        channel.admit(None, true, http).expect("handshake");

        assert!(channel.abandon());
        assert_eq!(channel.state(), &ChannelState::Unbound);
        assert!(registry.is_empty());
    }

    #[test]
    fn abandon_keeps_the_channel_transport_open_for_a_retry() {
        let registry = Arc::new(SessionRegistry::new());
        let mut channel = controller(&registry);
        let bound = http();

        let first = channel
            .admit(None, true, || Arc::clone(&bound))
            .expect("handshake");
        assert!(channel.abandon());
        assert!(!bound.is_closed());

        let retried = channel
            .admit(None, true, || Arc::clone(&bound))
            .expect("retried handshake");
        assert!(retried.is_established());
        assert_ne!(retried.session_id(), first.session_id());
        assert!(registry.lookup(retried.session_id().as_str()).is_ok());
        assert_eq!(registry.len(), 1);
    }
}
