//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ManagerError;
use crate::server::events::events_handler;
use crate::server::handlers::{
    cancel_handler, create_bot_handler, create_file_handler, delete_bot_handler,
    delete_file_handler, deploy_handler, deployments_handler, get_config_handler, health_handler,
    list_bots_handler, list_files_handler, put_config_handler, read_file_handler,
    restart_handler, service_logs_handler, status_handler, stop_handler, upload_handler,
    version_handler, write_file_handler,
};
use crate::server::state::ServerState;

/// Build the router with every route and middleware
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Bots
        .route("/api/bots", get(list_bots_handler).post(create_bot_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/bots/{name}", axum::routing::delete(delete_bot_handler))
        // Files
        .route("/api/bots/{name}/files", get(list_files_handler))
        .route(
            "/api/bots/{name}/files/{*path}",
            get(read_file_handler)
                .put(write_file_handler)
                .post(create_file_handler)
                .delete(delete_file_handler),
        )
        .route(
            "/api/bots/{name}/config",
            get(get_config_handler).put(put_config_handler),
        )
        // Deployment
        .route("/api/bots/{name}/deploy", post(deploy_handler))
        .route("/api/bots/{name}/stop", post(stop_handler))
        .route("/api/bots/{name}/restart", post(restart_handler))
        .route("/api/bots/{name}/cancel", post(cancel_handler))
        .route("/api/bots/{name}/status", get(status_handler))
        .route("/api/bots/{name}/logs", get(service_logs_handler))
        .route("/api/deployments", get(deployments_handler))
        // Events
        .route("/api/events", get(events_handler))
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ManagerError>>, ManagerError> {
    let app = router(state.clone());

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ManagerError::ServerError(format!("{addr}: {e}")))?;

    let shutdown = async move {
        shutdown_signal.await;
        state.close_streams();
    };

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ManagerError::ServerError(e.to_string()))
    });

    Ok(handle)
}
