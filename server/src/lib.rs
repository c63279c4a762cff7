//! # Chat Dev Server
//!
//! A small backend speaking the chat session wire protocol, for local
//! development and end-to-end tests of the client.
//!
//! ## Module Structure
//!
//! - [`state`]: connection registry shared by all handlers
//! - [`handlers`]: WebSocket lifecycle and frame answers
//! - [`api`]: REST endpoints

pub mod api;
pub mod handlers;
pub mod state;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

pub use state::AppState;

/// Builds the router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/api/sessions", get(api::list_sessions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the chat routes on `listener` until the process ends.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
