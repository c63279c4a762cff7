//! # REST API Endpoints

use crate::state::{AppState, ConnectionInfo};
use axum::{extract::State, Json};

/// `GET /api/sessions`: Every open chat connection with its counters,
/// oldest first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    let mut sessions: Vec<ConnectionInfo> = state
        .connections
        .iter()
        .map(|entry| entry.info.clone())
        .collect();
    sessions.sort_by_key(|s| s.connected_at);
    Json(sessions)
}
