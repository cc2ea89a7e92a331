//! Transport adapters
//!
//! A transport wraps one physical channel behind a uniform contract: push an outbound
//! message, attach a server-push receiver, and signal closure.

use std::fmt;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod http;
pub mod stdio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("no server-push stream is attached")]
    NoStream,
    #[error("a server-push stream is already attached")]
    StreamAlreadyOpen,
    #[error("transport does not support server-push streams")]
    Unsupported,
}

pub trait Transport: fmt::Debug + Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Queues an outbound message. Fails once the channel is gone; callers discard the
    /// message in that case.
    fn send(&self, message: Value) -> Result<(), TransportError>;

    /// Attaches the receiving half of the server-push stream.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Value>, TransportError>;

    /// Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
