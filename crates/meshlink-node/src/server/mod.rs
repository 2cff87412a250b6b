//! Bridge API server
//!
//! This module provides the REST and WebSocket endpoints in front of the
//! device session.

pub mod messages;
pub mod rest;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

/// Create the server router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(rest::health))
        // Commands
        .route("/command", post(rest::run_command))
        .route("/cli", post(rest::run_command))
        // Echo and ACK tracking
        .route("/echo/register", post(rest::register_echo))
        .route("/echo/summary", get(rest::echo_summary))
        .route("/echo/count", get(rest::echo_count))
        .route("/ack/status", get(rest::ack_status))
        // Persistent settings
        .route(
            "/settings/manual-add-contacts",
            post(rest::set_manual_add_contacts),
        )
        // WebSocket endpoint
        .route("/ws", get(websocket::ws_handler))
        // CORS for the web front end
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
