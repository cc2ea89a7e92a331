//! Session bookkeeping
//!
//! Owns the mapping from server-issued session identifiers to bound transports and the
//! per-channel handshake state machine that creates those bindings.

pub mod handshake;
pub mod registry;

pub use handshake::{Admission, ChannelState, HandshakeController, SessionError};
pub use registry::{RegistryError, Session, SessionId, SessionRegistry};
