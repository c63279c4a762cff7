//! # Chat Session
//!
//! The facade the rest of the application talks to. It composes
//!
//! - [`ConnectionManager`]: socket lifecycle and offline queue
//! - [`MessageAssembler`]: inbound frames → transcript
//! - [`ContextSynchronizer`]: deduplicated, acknowledged context updates
//! - [`SessionStore`]: transcript persistence
//!
//! and merges context fragments from callers into one accumulating context.
//!
//! `ChatSession` is plain synchronous state: every method runs to
//! completion without awaiting. Asynchronous inputs (socket traffic,
//! timers) arrive as [`SessionEvent`]s that the owner feeds to
//! [`ChatSession::handle_event`] one at a time. [`SessionHandle`] is the
//! owner used in applications.
//!
//! [`SessionHandle`]: crate::handle::SessionHandle

use chat_protocol::{decode, Context, Inbound, OutboundFrame};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::assembler::{Assembly, MessageAssembler};
use crate::config::SessionConfig;
use crate::connection::{ConnectionManager, Connector, Delivery, ReconnectPolicy, Transition};
use crate::context::{ContextSynchronizer, Submission};
use crate::error::SessionError;
use crate::event::{EventTx, SessionEvent, TimerKey};
use crate::state::{ChatMessage, ConnectionState, Role, SessionSnapshot};
use crate::store::{SessionStore, TranscriptBackend};

/// Notice shown when a frame had to wait for the connection.
const QUEUED_NOTICE: &str = "Not connected. Your message will be sent once the connection is restored.";

/// Receipt for [`ChatSession::send_user_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Id of the local transcript entry and of the `user_message` frame.
    pub id: String,
    /// Whether the frame went out immediately rather than being queued.
    pub delivered: bool,
}

pub struct ChatSession {
    connection: ConnectionManager,
    assembler: MessageAssembler,
    sync: ContextSynchronizer,
    store: SessionStore,
    context: Context,
    last_error: Option<SessionError>,
    auto_reconnect: bool,
    /// Streamed tokens not yet written to the store.
    dirty: bool,
}

impl ChatSession {
    /// Builds a session and restores any persisted transcript. Nothing is
    /// connected until [`connect`](Self::connect) or the first send.
    pub fn new(
        config: &SessionConfig,
        connector: Arc<dyn Connector>,
        backend: Box<dyn TranscriptBackend>,
        events: EventTx,
    ) -> Self {
        let store = SessionStore::new(backend, &config.session_scope);
        let mut assembler = MessageAssembler::new(config.legacy_text_ack);
        let restored = store.load();
        if !restored.is_empty() {
            info!("Restored {} message(s) from {}", restored.len(), store.key());
        }
        assembler.restore(restored);

        Self {
            connection: ConnectionManager::new(
                config.endpoint.clone(),
                ReconnectPolicy::from_config(config),
                connector,
                events.clone(),
            ),
            assembler,
            sync: ContextSynchronizer::new(config.context_ack_timeout(), events),
            store,
            context: Context::new(),
            last_error: None,
            auto_reconnect: config.reconnect,
            dirty: false,
        }
    }

    // ─── Connection ─────────────────────────────────────────────

    pub fn connect(&mut self) {
        self.connection.connect();
    }

    /// Manual reconnect after automatic attempts were exhausted.
    pub fn reconnect(&mut self) {
        if matches!(self.last_error, Some(SessionError::ExhaustedRetries { .. })) {
            self.last_error = None;
        }
        self.connection.reconnect();
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.assembler.interrupt();
        self.flush();
    }

    /// Stops everything: socket, reconnect timer and every ack timeout.
    pub fn teardown(&mut self) {
        self.disconnect();
        self.sync.cancel_all();
        debug!("Session torn down");
    }

    // ─── Outbound ───────────────────────────────────────────────

    /// Appends `text` to the transcript and sends it with the current
    /// context. Blank input is ignored.
    ///
    /// `extra_context` is merged over the accumulated context for this one
    /// message only.
    pub fn send_user_message(
        &mut self,
        text: &str,
        extra_context: Option<Context>,
    ) -> Option<SentMessage> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }

        let message = ChatMessage::new(Role::User, content);
        let id = message.id.clone();
        let timestamp = message.timestamp;
        self.assembler.push(message);
        self.persist();

        let mut snapshot = self.context.clone();
        if let Some(extra) = extra_context {
            snapshot.extend(extra);
        }
        let delivery = self.send(OutboundFrame::UserMessage {
            id: id.clone(),
            content: content.to_string(),
            timestamp,
            context: (!snapshot.is_empty()).then_some(snapshot),
        });

        Some(SentMessage {
            id,
            delivered: delivery == Delivery::Sent,
        })
    }

    /// Shallow-merges `fragment` into the accumulated context (later keys
    /// win) and submits the result for synchronization.
    pub fn merge_context(&mut self, fragment: Context) {
        self.context.extend(fragment);
        let submission = self.sync.submit(&self.context, &mut self.connection);
        if let Submission::Sent { .. } = submission {
            self.note_if_queued();
        }
    }

    /// Adds a message to the transcript without any network traffic.
    pub fn add_local_message(&mut self, role: Role, content: impl Into<String>) -> String {
        let message = ChatMessage::new(role, content);
        let id = message.id.clone();
        self.assembler.push(message);
        self.persist();
        id
    }

    /// Empties the transcript and its persisted copy.
    pub fn clear(&mut self) {
        self.assembler.clear();
        self.store.clear();
        self.dirty = false;
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    fn send(&mut self, frame: OutboundFrame) -> Delivery {
        let delivery = self.connection.send(frame);
        if delivery == Delivery::Queued {
            self.set_connection_notice();
        }
        delivery
    }

    fn note_if_queued(&mut self) {
        if self.connection.state() != ConnectionState::Open {
            self.set_connection_notice();
        }
    }

    fn set_connection_notice(&mut self) {
        if !matches!(self.last_error, Some(SessionError::ExhaustedRetries { .. })) {
            self.last_error = Some(SessionError::Connection(QUEUED_NOTICE.to_string()));
        }
    }

    // ─── Events ─────────────────────────────────────────────────

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Socket { generation, event } => {
                if let Some(transition) = self.connection.handle_socket(generation, event) {
                    self.apply_transition(transition);
                }
            }
            SessionEvent::Timer {
                key: TimerKey::Reconnect,
                seq,
            } => self.connection.handle_timer(seq),
            SessionEvent::Timer {
                key: TimerKey::ContextAck(context_id),
                seq,
            } => {
                if self.sync.handle_timeout(&context_id, seq) && self.last_error.is_none() {
                    self.last_error = Some(SessionError::SyncTimeout);
                }
            }
        }
    }

    fn apply_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Opened { .. } => {
                self.last_error = None;
            }
            Transition::Inbound(text) => self.handle_inbound(&text),
            Transition::Failed(message) => {
                self.last_error = Some(SessionError::Connection(message));
            }
            Transition::Closed { retry } => {
                self.assembler.interrupt();
                self.flush();
                if retry.is_none() && self.auto_reconnect {
                    self.last_error = Some(SessionError::ExhaustedRetries {
                        attempts: self.connection.attempts(),
                    });
                }
            }
        }
    }

    fn handle_inbound(&mut self, text: &str) {
        let assembly = match decode(text) {
            Ok(Inbound::Frame(frame)) => self.assembler.apply(frame),
            Ok(Inbound::RawText(raw)) => self.assembler.apply_raw(&raw),
            Err(e) => {
                warn!("Ignoring inbound payload: {}", e);
                return;
            }
        };

        match assembly {
            Assembly::Updated => self.persist(),
            Assembly::Streamed => self.dirty = true,
            Assembly::Unchanged => {}
            Assembly::ContextAck(context_id) => {
                self.sync.acknowledge(&context_id);
            }
            Assembly::LegacyContextAck => {
                self.persist();
                let settled = self.sync.acknowledge_all();
                debug!("Legacy acknowledgment settled {} context update(s)", settled);
            }
            Assembly::ServerError(message) => {
                warn!("Server error: {}", message);
                self.last_error = Some(SessionError::Server(message));
            }
        }
    }

    /// Writes the transcript. Token appends only mark it dirty; stream
    /// boundaries and interruptions write it out.
    fn persist(&mut self) {
        self.store.save(self.assembler.messages());
        self.dirty = false;
    }

    fn flush(&mut self) {
        if self.dirty {
            self.persist();
        }
    }

    // ─── Observation ────────────────────────────────────────────

    pub fn messages(&self) -> &[ChatMessage] {
        self.assembler.messages()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.assembler.is_streaming()
    }

    pub fn is_context_syncing(&self) -> bool {
        self.sync.is_syncing()
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection.state(),
            messages: self.assembler.messages().to_vec(),
            is_streaming: self.assembler.is_streaming(),
            is_context_syncing: self.sync.is_syncing(),
            pending_context_count: self.sync.pending_count(),
            queued_frames: self.connection.queued(),
            reconnect_attempt: self.connection.attempts(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::event::{EventRx, SocketEvent};
    use crate::store::MemoryBackend;
    use crate::test_support::MockConnector;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        session: ChatSession,
        connector: MockConnector,
        events: EventRx,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(SessionConfig::default(), MemoryBackend::default())
        }

        fn with(config: SessionConfig, backend: impl TranscriptBackend + 'static) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = MockConnector::default();
            let session = ChatSession::new(&config, Arc::new(connector.clone()), Box::new(backend), tx);
            Self {
                session,
                connector,
                events: rx,
            }
        }

        /// Processes every event already waiting in the channel.
        fn pump(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                self.session.handle_event(event);
            }
        }

        /// Waits for the next event (timers) and processes it.
        async fn next(&mut self) {
            let event = self.events.recv().await.expect("event channel closed");
            self.session.handle_event(event);
        }

        fn server(&mut self, event: SocketEvent) {
            self.connector.emit(self.connector.latest_generation(), event);
            self.pump();
        }

        fn server_frame(&mut self, frame: Value) {
            self.server(SocketEvent::Message(frame.to_string()));
        }

        fn open(&mut self) {
            self.session.connect();
            self.server(SocketEvent::Opened);
        }
    }

    fn ctx(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            _ => panic!("context must be an object"),
        }
    }

    #[tokio::test]
    async fn streamed_reply_becomes_one_message() {
        let mut h = Harness::new();
        h.open();
        h.server_frame(json!({ "type": "assistant_start", "id": "a1" }));
        assert!(h.session.is_streaming());
        h.server_frame(json!({ "type": "assistant_token", "id": "a1", "token": "Hel" }));
        h.server_frame(json!({ "type": "assistant_token", "id": "a1", "token": "lo" }));
        h.server_frame(json!({ "type": "assistant_end", "id": "a1" }));

        let messages = h.session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "Hello");
        assert!(!h.session.is_streaming());
    }

    #[tokio::test]
    async fn message_sent_while_disconnected_is_delivered_once_on_open() {
        let mut h = Harness::new();
        let sent = h.session.send_user_message("  hi ", None).unwrap();
        assert!(!sent.delivered);

        assert_eq!(h.session.messages().len(), 1);
        assert_eq!(h.session.messages()[0].content, "hi");
        assert_eq!(h.session.messages()[0].role, Role::User);
        assert_eq!(h.connector.opened(), 1);
        assert_eq!(h.session.connection_state(), ConnectionState::Connecting);
        assert!(matches!(h.session.last_error(), Some(SessionError::Connection(_))));

        h.server(SocketEvent::Opened);
        let frames = h.connector.frames_of("user_message");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["content"], "hi");
        assert_eq!(frames[0]["id"], sent.id.as_str());
        assert!(h.session.last_error().is_none());
    }

    #[tokio::test]
    async fn blank_input_sends_nothing() {
        let mut h = Harness::new();
        assert!(h.session.send_user_message("   \n", None).is_none());
        assert!(h.session.messages().is_empty());
        assert_eq!(h.connector.opened(), 0);
    }

    #[tokio::test]
    async fn user_message_carries_merged_context() {
        let mut h = Harness::new();
        h.open();
        h.session.merge_context(ctx(json!({ "stats": { "pages": 5 } })));
        h.session.merge_context(ctx(json!({ "tools": ["merge"], "stats": { "pages": 6 } })));
        h.session
            .send_user_message("summarize", Some(ctx(json!({ "focus": "page 2" }))))
            .unwrap();

        let frame = &h.connector.frames_of("user_message")[0];
        assert_eq!(
            frame["context"],
            json!({ "stats": { "pages": 6 }, "tools": ["merge"], "focus": "page 2" })
        );
        assert!(!h.session.context().contains_key("focus"));
        assert_eq!(h.connector.frames_of("context_update").len(), 2);
    }

    #[tokio::test]
    async fn identical_context_is_submitted_once() {
        let mut h = Harness::new();
        h.open();
        h.session.merge_context(ctx(json!({ "stats": { "pages": 5 } })));
        h.session.merge_context(ctx(json!({ "stats": { "pages": 5 } })));

        let updates = h.connector.frames_of("context_update");
        assert_eq!(updates.len(), 1);
        assert!(h.session.is_context_syncing());

        let context_id = updates[0]["contextId"].clone();
        h.server_frame(json!({ "type": "context_ack", "contextId": context_id }));
        assert!(!h.session.is_context_syncing());
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_context_times_out_and_late_ack_is_ignored() {
        let mut h = Harness::new();
        h.open();
        h.session.merge_context(ctx(json!({ "stats": { "pages": 5 } })));
        let context_id = h.connector.frames_of("context_update")[0]["contextId"].clone();

        tokio::time::advance(Duration::from_millis(10_000)).await;
        h.next().await;
        assert!(!h.session.is_context_syncing());
        assert_eq!(h.session.last_error(), Some(&SessionError::SyncTimeout));

        let before = h.session.snapshot();
        h.server_frame(json!({ "type": "context_ack", "contextId": context_id }));
        let after = h.session.snapshot();
        assert_eq!(after.pending_context_count, 0);
        assert_eq!(after.last_error, before.last_error);
        assert_eq!(after.messages, before.messages);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_does_not_replace_an_existing_error() {
        let mut h = Harness::new();
        h.open();
        h.session.merge_context(ctx(json!({ "a": 1 })));
        h.server_frame(json!({ "type": "error", "message": "quota" }));

        tokio::time::advance(Duration::from_secs(10)).await;
        h.next().await;
        assert_eq!(
            h.session.last_error(),
            Some(&SessionError::Server("quota".into()))
        );
    }

    #[tokio::test]
    async fn server_error_leaves_transcript_alone() {
        let mut h = Harness::new();
        h.open();
        h.server_frame(json!({ "type": "error", "message": "model overloaded" }));
        assert!(h.session.messages().is_empty());
        assert_eq!(
            h.session.last_error(),
            Some(&SessionError::Server("model overloaded".into()))
        );
    }

    #[tokio::test]
    async fn raw_text_and_unknown_frames() {
        let mut h = Harness::new();
        h.open();
        h.server(SocketEvent::Message("plain text".into()));
        h.server_frame(json!({ "type": "mystery" }));
        h.server_frame(json!({ "type": "pong", "ts": 1 }));

        assert_eq!(h.session.messages().len(), 1);
        assert_eq!(h.session.messages()[0].content, "plain text");
        assert!(h.session.is_streaming());
    }

    #[tokio::test]
    async fn legacy_text_ack_settles_pending_updates() {
        let mut h = Harness::new();
        h.open();
        h.session.merge_context(ctx(json!({ "a": 1 })));
        h.server_frame(json!({ "type": "assistant_message", "content": "Context updated." }));
        assert!(!h.session.is_context_syncing());
        assert_eq!(h.session.messages().len(), 1);
    }

    #[tokio::test]
    async fn local_messages_never_touch_the_network() {
        let mut h = Harness::new();
        h.session.add_local_message(Role::System, "Extracting 12 pages…");
        assert_eq!(h.session.messages()[0].role, Role::System);
        assert_eq!(h.connector.opened(), 0);
    }

    #[tokio::test]
    async fn close_mid_stream_stops_streaming() {
        let mut h = Harness::new();
        h.open();
        h.server_frame(json!({ "type": "assistant_token", "token": "partial" }));
        h.server(SocketEvent::Closed);

        assert!(!h.session.is_streaming());
        assert_eq!(h.session.connection_state(), ConnectionState::Closed);
        assert_eq!(h.session.messages()[0].content, "partial");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_require_manual_reconnect() {
        let config = SessionConfig {
            max_reconnect_attempts: 2,
            reconnect_base_delay_ms: 100,
            ..SessionConfig::default()
        };
        let mut h = Harness::with(config, MemoryBackend::default());
        h.session.connect();

        for attempt in 1..=2 {
            h.server(SocketEvent::Error("refused".into()));
            h.server(SocketEvent::Closed);
            assert_eq!(h.session.snapshot().reconnect_attempt, attempt);
            assert!(h.session.last_error().unwrap().is_retryable());

            tokio::time::advance(Duration::from_millis(100 * attempt as u64)).await;
            h.next().await;
            assert_eq!(h.session.connection_state(), ConnectionState::Reconnecting);
        }

        h.server(SocketEvent::Closed);
        assert_eq!(h.connector.opened(), 3);
        assert_eq!(
            h.session.last_error(),
            Some(&SessionError::ExhaustedRetries { attempts: 2 })
        );

        h.session.reconnect();
        assert_eq!(h.connector.opened(), 4);
        assert!(h.session.last_error().is_none());
        h.server(SocketEvent::Opened);
        assert_eq!(h.session.connection_state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn transcript_survives_a_new_session_and_clear_removes_it() {
        let backend = MemoryBackend::default();
        {
            let mut h = Harness::with(SessionConfig::default(), backend.clone());
            h.open();
            h.session.send_user_message("remember me", None);
            h.server_frame(json!({ "type": "assistant_message", "content": "ok" }));
        }

        let mut h = Harness::with(SessionConfig::default(), backend.clone());
        let contents: Vec<&str> = h.session.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["remember me", "ok"]);

        h.session.clear();
        assert!(h.session.messages().is_empty());
        let fresh = Harness::with(SessionConfig::default(), backend);
        assert!(fresh.session.messages().is_empty());
    }

    /// Counts writes and keeps the data in a shared [`MemoryBackend`].
    #[derive(Clone, Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        saves: Arc<AtomicUsize>,
    }

    impl TranscriptBackend for CountingBackend {
        fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.load(key)
        }

        fn save(&self, key: &str, data: &str) -> Result<(), StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(key, data)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn long_stream_is_written_at_its_boundaries() {
        let backend = CountingBackend::default();
        let mut h = Harness::with(SessionConfig::default(), backend.clone());
        h.open();
        h.server_frame(json!({ "type": "assistant_start", "id": "a1" }));
        for _ in 0..500 {
            h.server_frame(json!({ "type": "assistant_token", "id": "a1", "token": "x" }));
        }
        h.server_frame(json!({ "type": "assistant_end", "id": "a1" }));

        assert_eq!(backend.saves.load(Ordering::SeqCst), 2);
        let restored = Harness::with(SessionConfig::default(), backend.inner.clone());
        assert_eq!(restored.session.messages()[0].content, "x".repeat(500));
    }

    #[tokio::test]
    async fn close_mid_stream_persists_the_partial_reply() {
        let backend = CountingBackend::default();
        let mut h = Harness::with(SessionConfig::default(), backend.clone());
        h.open();
        h.server_frame(json!({ "type": "assistant_start", "id": "a1" }));
        h.server_frame(json!({ "type": "assistant_token", "id": "a1", "token": "par" }));
        h.server_frame(json!({ "type": "assistant_token", "id": "a1", "token": "tial" }));
        assert_eq!(backend.saves.load(Ordering::SeqCst), 1);

        h.server(SocketEvent::Closed);
        assert_eq!(backend.saves.load(Ordering::SeqCst), 2);
        let restored = Harness::with(SessionConfig::default(), backend.inner.clone());
        assert_eq!(restored.session.messages()[0].content, "partial");
    }

    #[tokio::test]
    async fn idless_stream_ends_on_the_server_id() {
        let mut h = Harness::new();
        h.open();
        h.server_frame(json!({ "type": "assistant_start" }));
        h.server_frame(json!({ "type": "assistant_token", "id": "a1", "token": "Hel" }));
        h.server_frame(json!({ "type": "assistant_token", "id": "a1", "token": "lo" }));
        h.server_frame(json!({ "type": "assistant_end", "id": "a1" }));

        assert!(!h.session.is_streaming());
        let messages = h.session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "a1");
        assert_eq!(messages[0].content, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_ack_timeouts() {
        let mut h = Harness::new();
        h.open();
        h.session.merge_context(ctx(json!({ "a": 1 })));
        h.session.teardown();

        assert_eq!(h.session.connection_state(), ConnectionState::Closed);
        assert!(!h.session.is_context_syncing());
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        h.pump();
        assert!(h.session.last_error().is_none());
    }
}
