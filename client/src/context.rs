//! # Context Synchronizer
//!
//! Sends the session context to the backend at most once per distinct
//! value and tracks each transmission until the backend acknowledges it or
//! its timeout elapses, whichever happens first.
//!
//! Document context can be large and is recomputed on many UI changes, so
//! every submission is reduced to a [`signature`] first; a submission whose
//! signature equals the last transmitted one is dropped.

use chat_protocol::{Context, OutboundFrame};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::event::{EventTx, TimerKey};
use crate::state::{new_id, now_millis};
use crate::timers::TimerRegistry;

/// Result of [`ContextSynchronizer::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Same signature as the last transmitted context.
    Unchanged,
    /// A `context_update` with this id was handed to the connection.
    Sent { context_id: String },
}

pub struct ContextSynchronizer {
    ack_timeout: Duration,
    last_signature: Option<String>,
    pending: HashSet<String>,
    timers: TimerRegistry,
}

impl ContextSynchronizer {
    pub fn new(ack_timeout: Duration, events: EventTx) -> Self {
        Self {
            ack_timeout,
            last_signature: None,
            pending: HashSet::new(),
            timers: TimerRegistry::new(events),
        }
    }

    /// True while at least one update awaits acknowledgment.
    pub fn is_syncing(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn last_signature(&self) -> Option<&str> {
        self.last_signature.as_deref()
    }

    /// Transmits `context` unless its signature matches the last one sent.
    pub fn submit(&mut self, context: &Context, connection: &mut ConnectionManager) -> Submission {
        let sig = signature(context);
        if self.last_signature.as_deref() == Some(sig.as_str()) {
            debug!("Context unchanged ({}), not resending", &sig[..12]);
            return Submission::Unchanged;
        }

        let context_id = new_id();
        self.pending.insert(context_id.clone());
        self.timers
            .register(TimerKey::ContextAck(context_id.clone()), self.ack_timeout);
        let delivery = connection.send(OutboundFrame::ContextUpdate {
            context_id: context_id.clone(),
            context: context.clone(),
            timestamp: now_millis(),
        });
        self.last_signature = Some(sig);

        info!(
            "Context update {} submitted ({:?}, {} pending)",
            context_id,
            delivery,
            self.pending.len()
        );
        Submission::Sent { context_id }
    }

    /// Settles the request for `context_id`. Returns `false` when there is
    /// nothing to settle (unknown id, or already timed out).
    pub fn acknowledge(&mut self, context_id: &str) -> bool {
        if !self.pending.remove(context_id) {
            debug!("Ignoring ack for unknown context {}", context_id);
            return false;
        }
        self.timers
            .cancel(&TimerKey::ContextAck(context_id.to_string()));
        debug!("Context {} acknowledged", context_id);
        true
    }

    /// Settles every pending request at once (legacy text acknowledgment).
    pub fn acknowledge_all(&mut self) -> usize {
        let settled = self.pending.len();
        self.pending.clear();
        self.timers.cancel_all();
        settled
    }

    /// Consumes an ack-timeout fire. Returns `true` when it expired a
    /// request that was still pending.
    pub fn handle_timeout(&mut self, context_id: &str, seq: u64) -> bool {
        let key = TimerKey::ContextAck(context_id.to_string());
        if !self.timers.fired(&key, seq) || !self.pending.remove(context_id) {
            return false;
        }
        warn!(
            "Context {} not acknowledged within {:?}",
            context_id, self.ack_timeout
        );
        true
    }

    /// Forgets every pending request without waiting for acks.
    pub fn cancel_all(&mut self) {
        self.pending.clear();
        self.timers.cancel_all();
    }
}

// ─── Signature ──────────────────────────────────────────────────

/// Hex SHA-256 of the parts of `context` that matter to the backend.
///
/// Chunk bodies are reduced to their id, length and page range, and files
/// to id and name; every other top-level key is hashed verbatim. Keys are
/// sorted by `serde_json::Map`, so insertion order never changes the result.
pub fn signature(context: &Context) -> String {
    let mut projected = Map::new();
    for (key, value) in context {
        let reduced = match (key.as_str(), value) {
            ("chunks", Value::Array(chunks)) => {
                Value::Array(chunks.iter().map(chunk_fingerprint).collect())
            }
            ("files", Value::Array(files)) => {
                Value::Array(files.iter().map(file_fingerprint).collect())
            }
            _ => value.clone(),
        };
        projected.insert(key.clone(), reduced);
    }

    let canonical = Value::Object(projected).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn chunk_fingerprint(chunk: &Value) -> Value {
    let body = chunk
        .get("text")
        .or_else(|| chunk.get("content"))
        .and_then(Value::as_str)
        .map(|s| s.chars().count());
    json!({
        "id": chunk.get("id"),
        "len": body,
        "page": chunk.get("page"),
        "pageStart": chunk.get("pageStart"),
        "pageEnd": chunk.get("pageEnd"),
    })
}

fn file_fingerprint(file: &Value) -> Value {
    json!({
        "id": file.get("id"),
        "name": file.get("name"),
    })
}
