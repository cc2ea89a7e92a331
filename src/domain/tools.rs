//! Interactive tools exposed via Model Context Protocol
//!
//! Declares the operation descriptors and their handlers, and assembles them into the
//! capability catalog in advertised order.

use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::macros;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::AppError;
use crate::mcp::catalog::{CapabilityCatalog, CatalogError, OperationHandler};

#[macros::mcp_tool(name = "echo", description = "Echo a message back unchanged")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct EchoTool {
    /// Message to echo
    pub message: String,
}

pub struct EchoHandler;

#[async_trait]
impl OperationHandler for EchoHandler {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, AppError> {
        let params: EchoTool = serde_json::from_value(Value::Object(arguments)).map_err(|_| {
            AppError::bad_request("invalid_arguments", "message is required and must be a string")
        })?;

        Ok(json!({ "message": params.message }))
    }
}

pub fn build_catalog() -> Result<CapabilityCatalog, CatalogError> {
    CapabilityCatalog::builder()
        .register(EchoTool::tool(), Arc::new(EchoHandler))
        .build()
}
