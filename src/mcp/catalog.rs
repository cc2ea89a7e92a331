//! Capability catalog
//!
//! The ordered, immutable set of operations advertised on `tools/list` together with
//! the handler bound to each name. Assembled once at startup.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use rust_mcp_sdk::schema::Tool;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::errors::AppError;

/// A named operation implementation.
///
/// Handlers receive the raw argument object and validate it themselves, failing with
/// [`AppError::BadRequest`] when it does not fit their input shape.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<Value, AppError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("operation `{0}` is registered more than once")]
    DuplicateName(String),
}

#[derive(Clone)]
struct Operation {
    descriptor: Tool,
    handler: Arc<dyn OperationHandler>,
}

#[derive(Default)]
pub struct CatalogBuilder {
    operations: Vec<Operation>,
}

impl CatalogBuilder {
    pub fn register(mut self, descriptor: Tool, handler: Arc<dyn OperationHandler>) -> Self {
        self.operations.push(Operation {
            descriptor,
            handler,
        });
        self
    }

    pub fn build(self) -> Result<CapabilityCatalog, CatalogError> {
        let mut by_name = HashMap::with_capacity(self.operations.len());
        for (index, operation) in self.operations.iter().enumerate() {
            let name = operation.descriptor.name.clone();
            if by_name.insert(name.clone(), index).is_some() {
                return Err(CatalogError::DuplicateName(name));
            }
        }

        Ok(CapabilityCatalog {
            operations: Arc::from(self.operations),
            by_name,
        })
    }
}

pub struct CapabilityCatalog {
    operations: Arc<[Operation]>,
    by_name: HashMap<String, usize>,
}

impl CapabilityCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Descriptors in declaration order. The iterator can be cloned and restarted freely.
    pub fn list(&self) -> impl Iterator<Item = &Tool> + Clone + '_ {
        self.operations.iter().map(|operation| &operation.descriptor)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn OperationHandler>> {
        self.by_name
            .get(name)
            .and_then(|index| self.operations.get(*index))
            .map(|operation| Arc::clone(&operation.handler))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
