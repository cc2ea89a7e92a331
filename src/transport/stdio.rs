//! Standard-stream transport
//!
//! Newline-delimited JSON-RPC over a reader/writer pair. The channel is its own session:
//! requests are handled one at a time and replies are written in arrival order. The serve
//! call returns when the reader hits EOF or fails, and the session is removed on the way
//! out.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::mcp::rpc::{is_json_rpc_error, json_rpc_error, session_error_to_json_rpc};
use crate::mcp::server::{is_initialize_request, message_id, McpServer};
use crate::session::{HandshakeController, SessionRegistry};
use crate::transport::{Transport, TransportError, TransportKind};

#[derive(Debug)]
pub struct StdioTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    closed: AtomicBool,
}

impl StdioTransport {
    fn new(outbound: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            closed: AtomicBool::new(false),
        }
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Value>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn send(&self, message: Value) -> Result<(), TransportError> {
        let outbound = self.outbound();
        let sender = outbound.as_ref().ok_or(TransportError::Closed)?;
        sender.send(message).map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Value>, TransportError> {
        Err(TransportError::Unsupported)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.outbound() = None;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Serves the process's stdin/stdout until stdin closes.
pub async fn serve_stdio(
    server: Arc<McpServer>,
    registry: Arc<SessionRegistry>,
) -> io::Result<()> {
    serve_channel(server, registry, tokio::io::stdin(), tokio::io::stdout()).await
}

pub async fn serve_channel<R, W>(
    server: Arc<McpServer>,
    registry: Arc<SessionRegistry>,
    reader: R,
    writer: W,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let transport = Arc::new(StdioTransport::new(sender));
    let writer_task = tokio::spawn(write_lines(writer, receiver));
    let mut controller = HandshakeController::new(Arc::clone(&registry));
    let mut lines = BufReader::new(reader).lines();

    info!("stdio channel opened");

    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => {
                warn!(error = %err, "stdio read failed, closing channel");
                break Err(err);
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Value>(line) {
            Ok(payload) => handle_line(&server, &mut controller, &transport, payload).await,
            Err(err) => {
                debug!(error = %err, "stdio line is not valid json");
                Some(json_rpc_error(None, -32700, "Parse error"))
            }
        };

        if let Some(reply) = reply {
            if let Err(err) = transport.send(reply) {
                warn!(error = %err, "stdio reply discarded, closing channel");
                break Ok(());
            }
        }
    };

    if !controller.terminate() {
        // Never initialized, or the session was already gone.
        transport.close();
    }

    match writer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "stdio writer failed"),
        Err(err) => warn!(error = %err, "stdio writer task aborted"),
    }

    info!("stdio channel closed");
    read_result
}

async fn handle_line(
    server: &McpServer,
    controller: &mut HandshakeController,
    transport: &Arc<StdioTransport>,
    payload: Value,
) -> Option<Value> {
    let is_initialize = is_initialize_request(&payload);
    let admission = match controller.admit(None, is_initialize, || {
        Arc::clone(transport) as Arc<dyn Transport>
    }) {
        Ok(admission) => admission,
        Err(err) => {
            warn!(error = %err, "stdio message rejected");
            if payload.is_array() {
                return Some(session_error_to_json_rpc(None, &err));
            }
            return message_id(&payload).map(|id| session_error_to_json_rpc(Some(id), &err));
        }
    };

    let reply = server
        .handle_json_rpc_value(admission.session_id(), payload)
        .await;

    if admission.is_established() && reply.as_ref().map_or(true, is_json_rpc_error) {
        controller.abandon();
    }

    reply
}

async fn write_lines<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Value>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = message.to_string();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
