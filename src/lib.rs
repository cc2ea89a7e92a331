use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod session;
pub mod transport;

use mcp::server::McpServer;
use session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub api_token: Option<Arc<str>>,
    pub registry: Arc<SessionRegistry>,
    pub server: Arc<McpServer>,
}

impl AppState {
    pub fn new(
        api_token: Option<String>,
        registry: Arc<SessionRegistry>,
        server: Arc<McpServer>,
    ) -> Self {
        Self {
            api_token: api_token.map(Arc::<str>::from),
            registry,
            server,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/mcp",
            post(http::handlers::mcp_endpoint)
                .get(http::handlers::mcp_stream)
                .delete(http::handlers::mcp_terminate),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
