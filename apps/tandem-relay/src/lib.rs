//! WebSocket relay pairing two participants per session and forwarding their
//! signaling payloads untouched.

pub mod config;
pub mod handlers;
pub mod hub;
pub mod websocket;

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use hub::{Joined, RelayError, RelayHub};

use handlers::{get_session_status, health_check};
use websocket::websocket_handler;

pub fn router(hub: RelayHub) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sessions/:session_id", get(get_session_status))
        .route("/ws/:session_id", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Serves the relay on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, hub: RelayHub) -> std::io::Result<()> {
    axum::serve(
        listener,
        router(hub).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
