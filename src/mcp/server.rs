//! The central Model Context Protocol engine
//!
//! Decodes JSON-RPC messages admitted onto a session, negotiates `initialize`, answers
//! discovery queries from the capability catalog and hands `tools/call` to the dispatch
//! router.

use std::sync::Arc;

use rust_mcp_sdk::schema::{
    CallToolRequest, CallToolRequestParams, CallToolResult, ContentBlock, Implementation,
    InitializeRequest, InitializeResult, JsonrpcMessage, JsonrpcRequest, ListPromptsRequest,
    ListPromptsResult, ListResourcesRequest, ListResourcesResult, ListToolsRequest,
    ListToolsResult, PingRequest, ServerCapabilities, ServerCapabilitiesPrompts,
    ServerCapabilitiesResources, ServerCapabilitiesTools, TextContent,
};
use serde_json::{json, Value};
use tracing::info;

use crate::errors::AppError;
use crate::mcp::catalog::CapabilityCatalog;
use crate::mcp::dispatch::DispatchRouter;
use crate::mcp::rpc::{
    app_error_to_json_rpc, is_json_rpc_error, json_rpc_error, json_rpc_result, request_id_to_value,
};
use crate::session::SessionId;

/// Newest first; the first entry is what the server prefers.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

pub struct McpServer {
    router: DispatchRouter,
}

impl McpServer {
    pub fn new(catalog: CapabilityCatalog) -> Self {
        Self {
            router: DispatchRouter::new(Arc::new(catalog)),
        }
    }

    pub async fn handle_json_rpc_value(
        &self,
        session_id: &SessionId,
        payload: Value,
    ) -> Option<Value> {
        if !payload.is_object() {
            return Some(json_rpc_error(None, -32600, "Invalid Request"));
        }

        let request_id = payload.get("id").cloned();
        let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(_) => return Some(json_rpc_error(request_id, -32600, "Invalid Request")),
        };

        match parsed {
            JsonrpcMessage::Request(request) => {
                if let Err(error_response) = validate_request_shape(&request) {
                    return Some(error_response);
                }

                let request_id = request_id_to_value(request.id);
                if request.method.trim().is_empty() {
                    return Some(json_rpc_error(Some(request_id), -32600, "Invalid Request"));
                }

                Some(
                    self.handle_json_rpc_request(
                        session_id,
                        Some(request_id),
                        request.method,
                        request.params.map(Value::Object),
                    )
                    .await,
                )
            }
            JsonrpcMessage::Notification(notification) => {
                if notification.method.trim().is_empty() {
                    return None;
                }

                let _ = self
                    .handle_json_rpc_request(
                        session_id,
                        None,
                        notification.method,
                        notification.params.map(Value::Object),
                    )
                    .await;
                None
            }
            JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
                Some(json_rpc_error(request_id, -32600, "Invalid Request"))
            }
        }
    }

    pub async fn handle_json_rpc_request(
        &self,
        session_id: &SessionId,
        id: Option<Value>,
        method: String,
        params: Option<Value>,
    ) -> Value {
        let audit_params = redact_audit_params(params.as_ref());

        let response = match method.as_str() {
            "initialize" => {
                let protocol_version = match negotiate_protocol_version(params.as_ref()) {
                    Ok(version) => version,
                    Err(err) => return app_error_to_json_rpc(id, err),
                };

                json_rpc_result(
                    id,
                    serde_json::to_value(initialize_result(protocol_version))
                        .expect("initialize result serialization"),
                )
            }
            "ping" => json_rpc_result(id, json!({})),
            "tools/list" => json_rpc_result(
                id,
                serde_json::to_value(ListToolsResult {
                    meta: None,
                    next_cursor: None,
                    tools: self.router.catalog().list().cloned().collect(),
                })
                .expect("tools list result serialization"),
            ),
            "tools/call" => self.handle_tools_call(id, params).await,
            "resources/list" => json_rpc_result(
                id,
                serde_json::to_value(ListResourcesResult {
                    meta: None,
                    next_cursor: None,
                    resources: vec![],
                })
                .expect("resources list result serialization"),
            ),
            "prompts/list" => json_rpc_result(
                id,
                serde_json::to_value(ListPromptsResult {
                    meta: None,
                    next_cursor: None,
                    prompts: vec![],
                })
                .expect("prompts list result serialization"),
            ),
            _ => json_rpc_error(id, -32601, "Method not found"),
        };

        info!(
            session_id = %session_id,
            method = %method,
            params = %audit_params,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp action audited"
        );

        response
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> Value {
        let Some(raw_params) = params else {
            return json_rpc_error(id, -32602, "Invalid params");
        };

        let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(id, -32602, "Invalid params"),
        };

        match self
            .router
            .dispatch(&tool_call.name, tool_call.arguments.unwrap_or_default())
            .await
        {
            Ok(payload) => json_rpc_result(
                id,
                serde_json::to_value(call_tool_result(payload))
                    .expect("call tool result serialization"),
            ),
            Err(err) => app_error_to_json_rpc(id, err),
        }
    }
}

fn initialize_result(protocol_version: &str) -> InitializeResult {
    InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            resources: Some(ServerCapabilitiesResources {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            prompts: Some(ServerCapabilitiesPrompts {
                list_changed: Some(false),
            }),
            ..Default::default()
        },
        protocol_version: protocol_version.to_string(),
        instructions: None,
        meta: None,
    }
}

/// Wraps a handler payload: objects travel as structured content, everything is also
/// rendered as a text block.
fn call_tool_result(payload: Value) -> CallToolResult {
    let text = payload.to_string();
    let structured_content = match payload {
        Value::Object(map) => Some(map),
        _ => None,
    };

    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text, None, None))],
        is_error: None,
        meta: None,
        structured_content,
    }
}

/// True for an `initialize` request (not notification).
pub fn is_initialize_request(payload: &Value) -> bool {
    payload.get("method").and_then(Value::as_str) == Some("initialize")
        && payload.get("id").is_some_and(|id| !id.is_null())
}

/// The correlation id of a message, if it has one.
pub fn message_id(payload: &Value) -> Option<Value> {
    payload.get("id").filter(|id| !id.is_null()).cloned()
}

pub fn validate_request_shape(request: &JsonrpcRequest) -> Result<(), Value> {
    let payload = serde_json::to_value(request).expect("jsonrpc request serialization");
    let request_id = Some(request_id_to_value(request.id.clone()));

    let valid = match request.method.as_str() {
        "tools/call" => serde_json::from_value::<CallToolRequest>(payload).is_ok(),
        "tools/list" => serde_json::from_value::<ListToolsRequest>(payload).is_ok(),
        "resources/list" => serde_json::from_value::<ListResourcesRequest>(payload).is_ok(),
        "prompts/list" => serde_json::from_value::<ListPromptsRequest>(payload).is_ok(),
        "ping" => serde_json::from_value::<PingRequest>(payload).is_ok(),
        "initialize" => serde_json::from_value::<InitializeRequest>(payload).is_ok(),
        _ => true,
    };

    if valid {
        Ok(())
    } else {
        Err(json_rpc_error(request_id, -32602, "Invalid params"))
    }
}

pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<&'static str, AppError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "invalid_protocol_version",
                "initialize params.protocolVersion is required",
            )
        })?;

    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|supported| *supported == offered_version)
        .ok_or_else(|| {
            AppError::bad_request(
                "unsupported_protocol_version",
                "unsupported initialize protocolVersion",
            )
        })
}

pub fn redact_audit_params(params: Option<&Value>) -> Value {
    params.map(redact_audit_value).unwrap_or(Value::Null)
}

pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".to_string()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    matches!(
        normalized.as_str(),
        "authorization" | "bearer" | "api_key" | "apikey"
    ) || normalized.contains("token")
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.contains("credential")
}
