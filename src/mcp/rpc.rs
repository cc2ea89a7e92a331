//! JSON-RPC protocol representations and formatting utilities
//!
//! Maps dispatch and session failures onto well-formed JSON-RPC error envelopes.

use rust_mcp_sdk::schema::{
    JsonrpcErrorResponse, JsonrpcResultResponse, RequestId, Result as McpResult, RpcError,
};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::session::SessionError;

pub const BAD_REQUEST_CODE: i32 = -32000;
pub const SESSION_NOT_FOUND_CODE: i32 = -32001;
pub const NO_VALID_SESSION_MESSAGE: &str = "Bad Request: No valid session ID provided";

pub fn is_json_rpc_error(value: &Value) -> bool {
    value.get("error").is_some()
}

pub fn app_error_to_json_rpc(id: Option<Value>, err: AppError) -> Value {
    match err {
        AppError::BadRequest { code, message } => json_rpc_error_with_data(
            id,
            -32602,
            "Invalid params",
            Some(json!({
                "code": code,
                "message": message,
                "details": {}
            })),
        ),
        AppError::UnknownOperation { name } => json_rpc_error_with_data(
            id,
            -32601,
            "Method not found",
            Some(json!({
                "code": "unknown_operation",
                "message": format!("unknown operation: {name}"),
                "details": {
                    "name": name,
                },
            })),
        ),
        AppError::HandlerFailure { rpc_code, message } => json_rpc_error_with_data_code(
            id,
            rpc_code,
            &message,
            Some(json!({
                "code": "handler_failure",
                "message": message,
                "details": {}
            })),
        ),
        AppError::Unauthorized { .. } | AppError::Internal { .. } => {
            json_rpc_error(id, -32603, "Internal error")
        }
    }
}

pub fn session_error_to_json_rpc(id: Option<Value>, err: &SessionError) -> Value {
    match err {
        SessionError::BadRequest => json_rpc_error(id, BAD_REQUEST_CODE, NO_VALID_SESSION_MESSAGE),
        SessionError::InvalidSession(_) => {
            json_rpc_error(id, SESSION_NOT_FOUND_CODE, "Session not found")
        }
        SessionError::AlreadyBound(_) => {
            json_rpc_error(id, -32600, "Invalid Request: Server already initialized")
        }
    }
}

pub fn json_rpc_error(id: Option<Value>, code: i32, message: &str) -> Value {
    json_rpc_error_with_data(id, code, message, None)
}

pub fn json_rpc_error_with_data(
    id: Option<Value>,
    code: i32,
    message: &str,
    data: Option<Value>,
) -> Value {
    json_rpc_error_with_data_code(id, i64::from(code), message, data)
}

fn json_rpc_error_with_data_code(
    id: Option<Value>,
    code: i64,
    message: &str,
    data: Option<Value>,
) -> Value {
    let Some(request_id) = id.as_ref().and_then(value_to_request_id) else {
        // Uncorrelated failures still carry an explicit `"id": null`.
        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let Some(data) = data {
            error["data"] = data;
        }
        return json!({
            "jsonrpc": "2.0",
            "error": error,
            "id": Value::Null,
        });
    };

    let response = JsonrpcErrorResponse::new(
        RpcError {
            code,
            data,
            message: message.to_string(),
        },
        Some(request_id),
    );
    serde_json::to_value(response).expect("jsonrpc error response serialization")
}

pub fn json_rpc_result(id: Option<Value>, result: Value) -> Value {
    if let Some(request_id) = id.as_ref().and_then(value_to_request_id) {
        let extra = result.as_object().cloned();
        let response = JsonrpcResultResponse::new(request_id, McpResult { meta: None, extra });
        return serde_json::to_value(response).expect("jsonrpc result response serialization");
    }

    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn value_to_request_id(value: &Value) -> Option<RequestId> {
    if let Some(string_id) = value.as_str() {
        return Some(RequestId::String(string_id.to_string()));
    }

    value.as_i64().map(RequestId::Integer)
}

pub fn request_id_to_value(id: RequestId) -> Value {
    match id {
        RequestId::String(value) => Value::String(value),
        RequestId::Integer(value) => Value::Number(value.into()),
    }
}
