//! Axum HTTP handlers for the web server
//!
//! `POST /mcp` carries client requests, `GET /mcp` opens the server-push stream and
//! `DELETE /mcp` terminates a session. Every `/mcp` call is tied to a session through the
//! `mcp-session-id` header, except the `initialize` request that creates one.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tracing::{info, warn};

use crate::mcp::rpc::{
    is_json_rpc_error, json_rpc_error, session_error_to_json_rpc, BAD_REQUEST_CODE,
    NO_VALID_SESSION_MESSAGE,
};
use crate::mcp::server::{is_initialize_request, message_id};
use crate::session::{HandshakeController, SessionError};
use crate::transport::{http::HttpTransport, Transport, TransportError};
use crate::AppState;

pub const SESSION_HEADER: &str = "mcp-session-id";
const INVALID_SESSION_MESSAGE: &str = "Invalid or missing session ID";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: "/mcp",
    })
}

pub async fn mcp_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json_rpc_error(None, -32700, "Parse error")),
            )
                .into_response()
        }
    };

    let presented = session_header(&headers);
    let mut controller = HandshakeController::new(Arc::clone(&state.registry));
    let is_initialize = is_initialize_request(&payload);
    let admission = match controller.admit(presented, is_initialize, new_transport) {
        Ok(admission) => admission,
        Err(err) => return reject_post(&payload, &err),
    };
    let session_id = admission.session_id().clone();

    if let Some(batch) = payload.as_array() {
        if batch.is_empty() {
            return (
                StatusCode::OK,
                Json(vec![json_rpc_error(None, -32600, "Invalid Request")]),
            )
                .into_response();
        }

        let mut responses = Vec::new();
        for item in batch {
            let response = match controller.admit(
                Some(session_id.as_str()),
                is_initialize_request(item),
                new_transport,
            ) {
                Ok(_) => state.server.handle_json_rpc_value(&session_id, item.clone()).await,
                Err(err) => message_id(item).map(|id| session_error_to_json_rpc(Some(id), &err)),
            };
            if let Some(response) = response {
                responses.push(response);
            }
        }

        if responses.is_empty() {
            return StatusCode::NO_CONTENT.into_response();
        }

        return (StatusCode::OK, Json(Value::Array(responses))).into_response();
    }

    let response = state.server.handle_json_rpc_value(&session_id, payload).await;

    if admission.is_established() {
        return match response {
            Some(response) if !is_json_rpc_error(&response) => (
                StatusCode::OK,
                [(SESSION_HEADER, session_id.to_string())],
                Json(response),
            )
                .into_response(),
            failed => {
                controller.abandon();
                match failed {
                    Some(response) => (StatusCode::OK, Json(response)).into_response(),
                    None => StatusCode::NO_CONTENT.into_response(),
                }
            }
        };
    }

    match response {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn mcp_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some((session_id, transport)) = session_header(&headers).and_then(|id| {
        state
            .registry
            .lookup(id)
            .ok()
            .map(|transport| (id.to_string(), transport))
    }) else {
        warn!(method = "GET", "invalid or missing session id");
        return invalid_session();
    };

    match transport.subscribe() {
        Ok(receiver) => {
            info!(session_id = %session_id, "server-push stream opened");
            let stream = UnboundedReceiverStream::new(receiver).map(|message| {
                Ok::<_, Infallible>(Event::default().event("message").data(message.to_string()))
            });
            Sse::new(stream)
                .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
                .into_response()
        }
        Err(TransportError::StreamAlreadyOpen) => (
            StatusCode::CONFLICT,
            Json(json_rpc_error(
                None,
                BAD_REQUEST_CODE,
                "Conflict: Only one SSE stream is allowed per session",
            )),
        )
            .into_response(),
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "server-push stream refused");
            invalid_session()
        }
    }
}

pub async fn mcp_terminate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let removed = session_header(&headers).and_then(|id| state.registry.remove(id));

    match removed {
        Some(_) => StatusCode::OK.into_response(),
        None => {
            warn!(method = "DELETE", "invalid or missing session id");
            invalid_session()
        }
    }
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn new_transport() -> Arc<dyn Transport> {
    Arc::new(HttpTransport::new())
}

fn invalid_session() -> Response {
    (StatusCode::BAD_REQUEST, INVALID_SESSION_MESSAGE).into_response()
}

fn reject_post(payload: &Value, err: &SessionError) -> Response {
    warn!(error = %err, "mcp request rejected by handshake");
    let body = match err {
        SessionError::BadRequest | SessionError::InvalidSession(_) => {
            json_rpc_error(None, BAD_REQUEST_CODE, NO_VALID_SESSION_MESSAGE)
        }
        SessionError::AlreadyBound(_) => session_error_to_json_rpc(message_id(payload), err),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
