//! HTTP session transport
//!
//! Each HTTP request/response pair carries its own reply, so the bound transport only
//! backs the optional server-push (SSE) stream opened with `GET /mcp`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::transport::{Transport, TransportError, TransportKind};

#[derive(Debug, Default)]
pub struct HttpTransport {
    stream: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Value>>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn send(&self, message: Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut stream = self.stream();
        let Some(sender) = stream.as_ref() else {
            return Err(TransportError::NoStream);
        };

        if sender.send(message).is_err() {
            // The client went away; a later GET may attach a new stream.
            *stream = None;
            return Err(TransportError::NoStream);
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Value>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut stream = self.stream();
        if stream.as_ref().is_some_and(|sender| !sender.is_closed()) {
            return Err(TransportError::StreamAlreadyOpen);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        *stream = Some(sender);
        Ok(receiver)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.stream() = None;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn send_without_stream_is_unroutable() {
        let transport = HttpTransport::new();

        assert_eq!(
            transport.send(json!({"method": "ping"})),
            Err(TransportError::NoStream)
        );
    }

    #[tokio::test]
    async fn subscribed_stream_receives_pushed_messages() {
        let transport = HttpTransport::new();
        let mut receiver = transport.subscribe().expect("subscribe");

        transport
            .send(json!({"jsonrpc": "2.0", "method": "notifications/message"}))
            .expect("push");

        let message = receiver.recv().await.expect("message");
        assert_eq!(message["method"], "notifications/message");
    }

    #[test]
    fn only_one_stream_per_session() {
        let transport = HttpTransport::new();
        let _receiver = transport.subscribe().expect("first stream");

        assert_eq!(
            transport.subscribe().map(|_| ()),
            Err(TransportError::StreamAlreadyOpen)
        );
    }

    #[test]
    fn dropped_stream_can_be_replaced() {
        let transport = HttpTransport::new();
        drop(transport.subscribe().expect("first stream"));

        assert!(transport.subscribe().is_ok());
    }

    #[tokio::test]
    async fn close_ends_the_stream_and_rejects_sends() {
        let transport = HttpTransport::new();
        let mut receiver = transport.subscribe().expect("subscribe");

        transport.close();
        transport.close();

        assert!(receiver.recv().await.is_none());
        assert!(transport.is_closed());
        assert_eq!(transport.send(json!({})), Err(TransportError::Closed));
        assert_eq!(
            transport.subscribe().map(|_| ()),
            Err(TransportError::Closed)
        );
    }
}
