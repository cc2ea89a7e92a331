//! Dispatch router
//!
//! Resolves a `tools/call` name against the capability catalog and runs the bound
//! handler. Every outcome, including a panicking handler, comes back as a `Result`.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::errors::AppError;
use crate::mcp::catalog::CapabilityCatalog;
use crate::mcp::server::redact_audit_value;

pub struct DispatchRouter {
    catalog: Arc<CapabilityCatalog>,
}

impl DispatchRouter {
    pub fn new(catalog: Arc<CapabilityCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value, AppError> {
        let Some(handler) = self.catalog.handler(name) else {
            warn!(operation = %name, "unknown operation requested");
            return Err(AppError::unknown_operation(name));
        };

        let audit_arguments = redact_audit_value(&Value::Object(arguments.clone()));
        debug!(operation = %name, arguments = %audit_arguments, "dispatching operation");

        // Runs detached so a disconnecting caller cannot cancel the handler midway and a
        // panic stays inside the task.
        let invocation = tokio::spawn(async move { handler.call(arguments).await });

        match invocation.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err)) => {
                error!(
                    operation = %name,
                    arguments = %audit_arguments,
                    error = %err,
                    "operation failed"
                );
                Err(normalize_failure(err))
            }
            Err(join_error) => {
                error!(
                    operation = %name,
                    arguments = %audit_arguments,
                    panicked = join_error.is_panic(),
                    "operation aborted"
                );
                Err(AppError::handler_failure(format!(
                    "operation `{name}` failed unexpectedly"
                )))
            }
        }
    }
}

fn normalize_failure(err: AppError) -> AppError {
    match err {
        AppError::BadRequest { .. }
        | AppError::UnknownOperation { .. }
        | AppError::HandlerFailure { .. } => err,
        AppError::Unauthorized { message, .. } => AppError::handler_failure(message),
        AppError::Internal { message, .. } => AppError::handler_failure(message),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_mcp_sdk::macros;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::mcp::catalog::OperationHandler;

    #[macros::mcp_tool(name = "count_a", description = "Counting operation A")]
    #[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
    struct CountA {
        pub value: Option<String>,
    }

    #[macros::mcp_tool(name = "count_b", description = "Counting operation B")]
    #[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
    struct CountB {
        pub value: Option<String>,
    }

    #[macros::mcp_tool(name = "broken", description = "Always fails")]
    #[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
    struct Broken {
        pub value: Option<String>,
    }

    #[macros::mcp_tool(name = "panicky", description = "Always panics")]
    #[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
    struct Panicky {
        pub value: Option<String>,
    }

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OperationHandler for Counting {
        async fn call(&self, arguments: Map<String, Value>) -> Result<Value, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Object(arguments))
        }
    }

    struct Failing;

    #[async_trait]
    impl OperationHandler for Failing {
        async fn call(&self, _arguments: Map<String, Value>) -> Result<Value, AppError> {
            Err(AppError::internal("workspace api returned 503"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl OperationHandler for Panicking {
        async fn call(&self, _arguments: Map<String, Value>) -> Result<Value, AppError> {
            panic!("handler bug");
        }
    }

    fn router(a: Arc<Counting>, b: Arc<Counting>) -> DispatchRouter {
        let catalog = CapabilityCatalog::builder()
            .register(CountA::tool(), a)
            .register(CountB::tool(), b)
            .register(Broken::tool(), Arc::new(Failing))
            .register(Panicky::tool(), Arc::new(Panicking))
            .build()
            .expect("catalog");
        DispatchRouter::new(Arc::new(catalog))
    }

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object arguments")
    }

    #[tokio::test]
    async fn every_catalog_operation_reaches_its_own_handler_once() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let router = router(Arc::clone(&a), Arc::clone(&b));

        for (name, counter) in [("count_a", &a), ("count_b", &b)] {
            let before = counter.calls.load(Ordering::SeqCst);
            let payload = router
                .dispatch(name, arguments(json!({ "op": name })))
                .await
                .expect("dispatch succeeds");

            assert_eq!(payload, json!({ "op": name }));
            assert_eq!(counter.calls.load(Ordering::SeqCst), before + 1);
        }

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn catalog_iteration_covers_every_bound_name() {
        let router = router(Arc::default(), Arc::default());
        let names = router
            .catalog()
            .list()
            .map(|tool| tool.name.clone())
            .collect::<Vec<_>>();

        for name in names {
            let result = router.dispatch(&name, Map::new()).await;
            assert!(
                !matches!(result, Err(AppError::UnknownOperation { .. })),
                "{name} must be routable"
            );
        }
    }

    #[tokio::test]
    async fn unknown_operation_is_a_failure_not_a_fault() {
        let router = router(Arc::default(), Arc::default());

        let error = router
            .dispatch("nonexistent_operation", Map::new())
            .await
            .expect_err("unknown operation");

        assert!(matches!(
            error,
            AppError::UnknownOperation { ref name } if name == "nonexistent_operation"
        ));
    }

    #[tokio::test]
    async fn handler_errors_become_handler_failures() {
        let router = router(Arc::default(), Arc::default());

        let error = router
            .dispatch("broken", Map::new())
            .await
            .expect_err("failing handler");

        assert!(matches!(
            error,
            AppError::HandlerFailure { rpc_code: -32603, ref message } if message.contains("503")
        ));
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let router = router(Arc::default(), Arc::default());

        let error = router
            .dispatch("panicky", Map::new())
            .await
            .expect_err("panicking handler");

        assert!(matches!(error, AppError::HandlerFailure { .. }));
        assert!(router.dispatch("count_a", Map::new()).await.is_ok());
    }
}
