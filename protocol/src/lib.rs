//! # Chat Wire Protocol
//!
//! Frames exchanged between the chat session client and a chat backend over
//! a persistent WebSocket connection. Every frame is a JSON text message
//! using serde's internally-tagged representation: a `"type"` field carries
//! the snake_case variant name and the remaining fields sit next to it,
//! camelCased (e.g. `{"type": "context_ack", "contextId": "..."}`).
//!
//! Both the client (`chat-session`) and the dev backend (`chat-devserver`)
//! depend on this crate, so the two ends cannot drift apart.
//!
//! Inbound payloads that are not JSON at all are not errors: backends are
//! allowed to stream plain text, which the client treats as a token for the
//! message currently being streamed. See [`decode`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Accumulated document/settings context sent to the backend.
pub type Context = serde_json::Map<String, Value>;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    /// Valid JSON that does not describe a known frame.
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),

    #[error("failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ─── Client → Server ────────────────────────────────────────────

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A message typed by the user, optionally carrying the merged context
    /// snapshot that was current when it was sent.
    UserMessage {
        id: String,
        content: String,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Context>,
    },

    /// A new version of the session context. The server answers with
    /// [`InboundFrame::ContextAck`] carrying the same `context_id`.
    #[serde(rename_all = "camelCase")]
    ContextUpdate {
        context_id: String,
        context: Context,
        timestamp: i64,
    },

    /// Heartbeat request.
    Ping { ts: i64 },
}

impl OutboundFrame {
    /// Whether the frame is worth keeping in the offline queue.
    ///
    /// Heartbeats describe the liveness of one particular socket and are
    /// dropped instead of being replayed on the next one.
    pub fn is_queueable(&self) -> bool {
        !matches!(self, OutboundFrame::Ping { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::UserMessage { .. } => "user_message",
            OutboundFrame::ContextUpdate { .. } => "context_update",
            OutboundFrame::Ping { .. } => "ping",
        }
    }
}

// ─── Server → Client ────────────────────────────────────────────

/// Frames sent by the backend.
///
/// Every `id` is optional: backends that omit it address the message that
/// is currently being streamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    // ── Streaming ─────────────────────────────────────────────────
    AssistantStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    AssistantToken {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        token: String,
    },

    AssistantEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    // ── Complete replies ──────────────────────────────────────────
    /// A finished, non-streamed assistant reply.
    AssistantMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    // ── Context sync ──────────────────────────────────────────────
    #[serde(rename_all = "camelCase")]
    ContextAck { context_id: String },

    // ── Misc ──────────────────────────────────────────────────────
    Error { message: String },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<i64>,
    },
}

/// Result of decoding one inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(InboundFrame),
    /// Payload that is not a JSON object, kept verbatim.
    RawText(String),
}

// ─── Codec ──────────────────────────────────────────────────────

/// Serializes a client frame into its JSON text form.
pub fn encode(frame: &OutboundFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Classifies an inbound text payload.
///
/// - not JSON, or JSON that is not an object (a bare string or number) →
///   [`Inbound::RawText`] holding the untouched payload
/// - a JSON object matching a known frame → [`Inbound::Frame`]
/// - any other JSON object → [`ProtocolError::Unrecognized`]
///
/// Whitespace is significant in raw text (a token may be a single space), so
/// only a zero-length payload is rejected as [`ProtocolError::Empty`].
pub fn decode(text: &str) -> Result<Inbound, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => serde_json::from_value::<InboundFrame>(value)
            .map(Inbound::Frame)
            .map_err(|e| ProtocolError::Unrecognized(e.to_string())),
        Ok(_) | Err(_) => Ok(Inbound::RawText(text.to_string())),
    }
}

/// Server-side counterpart of [`decode`]: parses a client frame.
pub fn decode_client(text: &str) -> Result<OutboundFrame, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Unrecognized(e.to_string()))
}

/// Server-side counterpart of [`encode`].
pub fn encode_server(frame: &InboundFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}
