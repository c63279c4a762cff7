//! # Session State
//!
//! Contains the data types observed by the rest of the application:
//! - [`ConnectionState`]: lifecycle of the single logical connection
//! - [`ChatMessage`]: one entry of the transcript
//! - [`SessionSnapshot`]: everything a UI needs to re-render, published
//!   after every processed event

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

// ─── Connection ─────────────────────────────────────────────────

/// Lifecycle of the connection owned by the
/// [`ConnectionManager`](crate::connection::ConnectionManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Error,
}

impl ConnectionState {
    /// Whether a socket exists that is either usable or about to be.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting | ConnectionState::Open
        )
    }
}

// ─── Transcript ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Local status notices. Never sent over the wire.
    System,
}

/// One transcript entry.
///
/// `content` only grows while the message is the assembler's active
/// streaming message; afterwards it is never touched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ChatMessage {
    /// Creates a message stamped with the current time and a fresh id.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// Generates a collision-free identifier for messages and context updates.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─── Snapshot ───────────────────────────────────────────────────

/// Read-only view of a session, cheap enough to clone after every event.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub messages: Vec<ChatMessage>,
    pub is_streaming: bool,
    pub is_context_syncing: bool,
    pub pending_context_count: usize,
    /// Frames waiting for the connection to open.
    pub queued_frames: usize,
    pub reconnect_attempt: u32,
    pub last_error: Option<SessionError>,
}
