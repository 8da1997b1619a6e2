//! Network surface: one axum router serving the WebSocket endpoint and the
//! operator REST API.
//!
//! - [`ws`]: `GET /ws`, the persistent duplex connection
//! - [`http`]: `/health` and `/v1/projects/...`

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use vigil_types::VigilError;

use crate::plane::{wait_for_shutdown, ControlPlane};

pub fn router(plane: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/health", get(http::health_handler))
        .route("/v1/projects/{id}/state", get(http::state_handler))
        .route("/v1/projects/{id}/transitions", get(http::transitions_handler))
        .route("/v1/projects/{id}/connections", get(http::connections_handler))
        .route(
            "/v1/projects/{id}/zones",
            get(http::list_zones_handler).post(http::add_zone_handler),
        )
        .route(
            "/v1/projects/{id}/zones/{zone_id}",
            delete(http::delete_zone_handler),
        )
        .route("/v1/projects/{id}/command", post(http::command_handler))
        .with_state(plane)
}

/// Bind the configured listen address.
pub async fn bind(listen_addr: &str) -> Result<TcpListener, VigilError> {
    TcpListener::bind(listen_addr)
        .await
        .map_err(|e| VigilError::ConfigError(format!("failed to bind {listen_addr}: {e}")))
}

/// Serve until [`ControlPlane::shutdown`] is called.
pub async fn serve(listener: TcpListener, plane: Arc<ControlPlane>) -> Result<(), VigilError> {
    let addr = listener
        .local_addr()
        .map_err(|e| VigilError::ConfigError(format!("listener has no address: {e}")))?;
    info!(addr = %addr, "vigil control plane listening");

    let sweeper = plane.spawn_sweeper();
    let mut shutdown = plane.shutdown_signal();
    let result = axum::serve(listener, router(Arc::clone(&plane)))
        .with_graceful_shutdown(async move {
            wait_for_shutdown(&mut shutdown).await;
        })
        .await
        .map_err(|e| VigilError::ProtocolError(format!("server error: {e}")));
    sweeper.abort();
    info!("vigil control plane stopped");
    result
}
