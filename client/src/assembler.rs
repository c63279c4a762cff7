//! # Message Assembler
//!
//! Turns inbound frames into the transcript. Frames are applied strictly in
//! arrival order; the transcript only ever grows, except that the single
//! *active* assistant message may grow its content while tokens stream in.
//!
//! The active message is tracked by index, so appending a token is O(1)
//! amortized regardless of transcript length.
//!
//! A stream opened without an id gets a local one. The first id the server
//! sends for that stream replaces it.
//!
//! Frames the assembler does not own (`context_ack`, `error`, `pong`) are
//! passed back as an [`Assembly`] for the session to route.

use chat_protocol::InboundFrame;
use tracing::{debug, trace, warn};

use crate::compat;
use crate::state::{new_id, now_millis, ChatMessage, Role};

/// What applying one frame amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// The transcript changed shape: a message was added or finished.
    Updated,
    /// The active message grew in place.
    Streamed,
    /// Nothing to do (duplicate start, end without a stream, heartbeat).
    Unchanged,
    ContextAck(String),
    /// An assistant message was appended and its text is a legacy
    /// acknowledgment of every pending context update.
    LegacyContextAck,
    ServerError(String),
}

#[derive(Debug, Default)]
pub struct MessageAssembler {
    messages: Vec<ChatMessage>,
    /// Index of the message currently receiving tokens.
    active: Option<usize>,
    /// Whether the active message's id was assigned by the server.
    server_id: bool,
    legacy_text_ack: bool,
}

impl MessageAssembler {
    pub fn new(legacy_text_ack: bool) -> Self {
        Self {
            legacy_text_ack,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ChatMessage> {
        self.active.map(|i| &self.messages[i])
    }

    /// Replaces the transcript with a restored one. Nothing is active.
    pub fn restore(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.active = None;
        self.server_id = false;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.active = None;
        self.server_id = false;
    }

    /// Appends a locally created message (user input or status notice).
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Abandons the active stream, e.g. because the connection dropped.
    /// Content received so far is kept.
    pub fn interrupt(&mut self) {
        if let Some(i) = self.active.take() {
            debug!("Stream {} interrupted", self.messages[i].id);
        }
        self.server_id = false;
    }

    pub fn apply(&mut self, frame: InboundFrame) -> Assembly {
        match frame {
            InboundFrame::AssistantStart { id, timestamp } => self.start(id, timestamp),
            InboundFrame::AssistantToken { id, token } => self.append_token(id.as_deref(), &token),
            InboundFrame::AssistantMessage {
                id,
                content,
                timestamp,
            } => {
                let legacy_ack = self.legacy_text_ack && compat::is_legacy_context_ack(&content);
                self.messages.push(ChatMessage {
                    id: id.unwrap_or_else(new_id),
                    role: Role::Assistant,
                    content,
                    timestamp: timestamp.unwrap_or_else(now_millis),
                });
                if legacy_ack {
                    Assembly::LegacyContextAck
                } else {
                    Assembly::Updated
                }
            }
            InboundFrame::AssistantEnd { id, .. } => self.end(id.as_deref()),
            InboundFrame::ContextAck { context_id } => Assembly::ContextAck(context_id),
            InboundFrame::Error { message } => Assembly::ServerError(message),
            InboundFrame::Pong { ts } => {
                trace!("Pong {:?}", ts);
                Assembly::Unchanged
            }
        }
    }

    /// Handles a payload that was not a frame: a token for the active
    /// message, starting one if nothing is streaming.
    pub fn apply_raw(&mut self, text: &str) -> Assembly {
        self.append_token(None, text)
    }

    fn start(&mut self, id: Option<String>, timestamp: Option<i64>) -> Assembly {
        if let Some(active) = self.active() {
            match &id {
                Some(id) if *id != active.id => {
                    warn!(
                        "assistant_start for {} while {} is streaming; finishing it",
                        id, active.id
                    );
                    self.active = None;
                }
                _ => return Assembly::Unchanged,
            }
        }
        self.begin(id, timestamp);
        Assembly::Updated
    }

    /// Finishes the active stream whatever id the frame carries.
    fn end(&mut self, id: Option<&str>) -> Assembly {
        let Some(active) = self.active() else {
            return Assembly::Unchanged;
        };
        if let Some(id) = id {
            if active.id != id {
                debug!("assistant_end for {} while {} is active", id, active.id);
            }
        }
        self.active = None;
        self.server_id = false;
        Assembly::Updated
    }

    fn append_token(&mut self, id: Option<&str>, token: &str) -> Assembly {
        let (index, result) = match (self.active, id) {
            (Some(i), None) => (i, Assembly::Streamed),
            (Some(i), Some(id)) if self.messages[i].id == id => (i, Assembly::Streamed),
            (Some(i), Some(id)) if !self.server_id => {
                debug!("Stream {} adopts server id {}", self.messages[i].id, id);
                self.messages[i].id = id.to_string();
                self.server_id = true;
                (i, Assembly::Updated)
            }
            (Some(i), Some(id)) => {
                warn!(
                    "Token for {} while {} is streaming; starting a new message",
                    id, self.messages[i].id
                );
                (self.begin(Some(id.to_string()), None), Assembly::Updated)
            }
            (None, id) => {
                debug!("Token without assistant_start; starting a message");
                (self.begin(id.map(str::to_string), None), Assembly::Updated)
            }
        };
        self.messages[index].content.push_str(token);
        result
    }

    fn begin(&mut self, id: Option<String>, timestamp: Option<i64>) -> usize {
        self.server_id = id.is_some();
        self.messages.push(ChatMessage {
            id: id.unwrap_or_else(new_id),
            role: Role::Assistant,
            content: String::new(),
            timestamp: timestamp.unwrap_or_else(now_millis),
        });
        let index = self.messages.len() - 1;
        self.active = Some(index);
        index
    }
}
