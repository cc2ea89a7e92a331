use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use workspace_mcp_server::{
    build_app,
    config::{Config, TransportMode},
    domain::tools::build_catalog,
    logging,
    mcp::server::McpServer,
    session::SessionRegistry,
    transport::stdio::serve_stdio,
    AppState,
};

#[tokio::main]
async fn main() {
    logging::init_logging();
    logging::install_panic_hook();

    if let Err(err) = run().await {
        error!(error = %err, "server terminated");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let catalog = build_catalog()?;
    info!(operations = catalog.len(), "capability catalog assembled");

    let server = Arc::new(McpServer::new(catalog));
    let registry = Arc::new(SessionRegistry::new());

    match config.transport {
        TransportMode::Stdio => {
            info!("server starting on stdio");
            serve_stdio(server, registry).await?;
        }
        TransportMode::Http => {
            let bind_socket = config.bind_socket()?;
            let state = AppState::new(config.api_token.clone(), Arc::clone(&registry), server);
            let app = build_app(state);
            let listener = tokio::net::TcpListener::bind(bind_socket).await?;

            info!(
                bind_addr = %config.bind_addr,
                bind_port = config.bind_port,
                auth = config.api_token.is_some(),
                "server starting"
            );

            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            let closed = registry.drain().len();
            info!(sessions = closed, "server shutdown complete");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
