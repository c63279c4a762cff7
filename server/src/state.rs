//! # Server State
//!
//! One registry entry per open WebSocket, keyed by connection id. Each entry
//! holds the last context the client synchronized and the counters exposed
//! by `GET /api/sessions`. Outbound queues stay with their connection task.
//!
//! The registry is a [`DashMap`] because every connection runs on its own
//! task.

use chat_protocol::{Context, InboundFrame};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Pushes frames onto a client's outbound WebSocket queue.
pub type ClientTx = mpsc::UnboundedSender<InboundFrame>;

/// Public view of a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: String,
    /// Milliseconds since the Unix epoch.
    pub connected_at: i64,
    pub user_messages: u64,
    pub context_updates: u64,
    /// Heartbeat pings answered.
    pub pings: u64,
    /// Top-level keys of the most recent context.
    pub context_keys: Vec<String>,
}

pub struct Connection {
    pub info: ConnectionInfo,
    pub context: Context,
}

impl Connection {
    pub fn new(connection_id: String) -> Self {
        Self {
            info: ConnectionInfo {
                connection_id,
                connected_at: now_millis(),
                user_messages: 0,
                context_updates: 0,
                pings: 0,
                context_keys: Vec::new(),
            },
            context: Context::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct AppState {
    pub connections: Arc<DashMap<String, Connection>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
