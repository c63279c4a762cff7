//! # WebSocket Handlers
//!
//! Contains the per-connection logic of the development backend:
//! - Upgrading HTTP connections to WebSocket
//! - Managing the lifecycle of each connection (outbound task, cleanup)
//! - Answering client frames: context updates are acknowledged, user
//!   messages get a streamed echo reply, pings get a pong

use crate::state::{now_millis, AppState, ClientTx, Connection};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chat_protocol::{decode_client, encode_server, Context, InboundFrame, OutboundFrame};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ─── WebSocket Upgrade Endpoint ─────────────────────────────────

/// `GET /ws`: Upgrades the HTTP connection to a chat WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

// ─── Connection Lifecycle ───────────────────────────────────────

/// Manages the full lifecycle of a single chat connection.
///
/// ## Flow:
/// 1. Assign a connection id and register it
/// 2. Spawn an outbound task that encodes and sends queued frames
/// 3. Answer incoming frames on the current task
/// 4. On disconnect: stop the outbound task and unregister
async fn handle_connection(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4().to_string();
    info!("New chat connection: {}", conn_id);

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundFrame>();
    state
        .connections
        .insert(conn_id.clone(), Connection::new(conn_id.clone()));

    // ── Outbound Task ──
    let outbound_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match encode_server(&frame) {
                Ok(text) => text,
                Err(e) => {
                    error!("Serialize error: {}", e);
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // ── Inbound Loop ──
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => handle_text(&state, &conn_id, &tx, text.as_str()),
            Message::Close(_) => break,
            _ => {}
        }
    }

    // ── Cleanup on Disconnect ──
    info!("Disconnecting: {}", conn_id);
    outbound_task.abort();
    state.connections.remove(&conn_id);
}

// ─── Frame Dispatch ─────────────────────────────────────────────

/// Decodes one client payload and answers it. Payloads that are not a
/// known frame are answered with an `error` frame.
pub fn handle_text(state: &AppState, conn_id: &str, tx: &ClientTx, text: &str) {
    match decode_client(text) {
        Ok(frame) => handle_frame(state, conn_id, tx, frame),
        Err(e) => {
            warn!("Bad frame from {}: {}", conn_id, e);
            let _ = tx.send(InboundFrame::Error {
                message: format!("unrecognized frame: {}", e),
            });
        }
    }
}

fn handle_frame(state: &AppState, conn_id: &str, tx: &ClientTx, frame: OutboundFrame) {
    match frame {
        OutboundFrame::ContextUpdate {
            context_id,
            context,
            ..
        } => {
            debug!("Context {} from {} ({} keys)", context_id, conn_id, context.len());
            if let Some(mut conn) = state.connections.get_mut(conn_id) {
                conn.info.context_updates += 1;
                conn.info.context_keys = context.keys().cloned().collect();
                conn.context = context;
            }
            let _ = tx.send(InboundFrame::ContextAck { context_id });
        }

        OutboundFrame::UserMessage {
            id,
            content,
            context,
            ..
        } => {
            debug!("User message {} from {}", id, conn_id);
            let known_keys = match state.connections.get_mut(conn_id) {
                Some(mut conn) => {
                    conn.info.user_messages += 1;
                    conn.context.len()
                }
                None => 0,
            };
            let reply = echo_reply(&content, context.as_ref(), known_keys);
            stream_reply(tx, &reply);
        }

        OutboundFrame::Ping { ts } => {
            if let Some(mut conn) = state.connections.get_mut(conn_id) {
                conn.info.pings += 1;
            }
            let _ = tx.send(InboundFrame::Pong { ts: Some(ts) });
        }
    }
}

// ─── Replies ────────────────────────────────────────────────────

/// The text the dev backend answers a user message with.
pub fn echo_reply(content: &str, context: Option<&Context>, synced_keys: usize) -> String {
    let attached = context.map_or(0, |c| c.len());
    format!(
        "You said: {} (context: {} attached, {} synced)",
        content, attached, synced_keys
    )
}

/// Sends `reply` as `assistant_start`, one `assistant_token` per word, and
/// `assistant_end`, all carrying the same id.
pub fn stream_reply(tx: &ClientTx, reply: &str) {
    let id = Uuid::new_v4().to_string();
    let _ = tx.send(InboundFrame::AssistantStart {
        id: Some(id.clone()),
        timestamp: Some(now_millis()),
    });
    for token in tokens(reply) {
        let _ = tx.send(InboundFrame::AssistantToken {
            id: Some(id.clone()),
            token,
        });
    }
    let _ = tx.send(InboundFrame::AssistantEnd {
        id: Some(id),
        timestamp: Some(now_millis()),
    });
}

/// Splits on whitespace; every word after the first carries its leading
/// space, so concatenating the tokens rebuilds the words joined by spaces.
fn tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connected() -> (AppState, ClientTx, mpsc::UnboundedReceiver<InboundFrame>) {
        let state = AppState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .connections
            .insert("c1".into(), Connection::new("c1".into()));
        (state, tx, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<InboundFrame>) -> Vec<InboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn tokens_rebuild_the_reply() {
        let reply = "You said:  hello   world";
        assert_eq!(tokens(reply).concat(), "You said: hello world");
        assert!(tokens("").is_empty());
    }

    #[test]
    fn context_update_is_acknowledged_and_recorded() {
        let (state, tx, mut rx) = connected();
        let frame = json!({
            "type": "context_update",
            "contextId": "ctx-1",
            "context": { "stats": { "pages": 5 }, "files": [] },
            "timestamp": 1
        });
        handle_text(&state, "c1", &tx, &frame.to_string());

        assert_eq!(
            drain(&mut rx),
            vec![InboundFrame::ContextAck {
                context_id: "ctx-1".into()
            }]
        );
        let conn = state.connections.get("c1").unwrap();
        assert_eq!(conn.info.context_updates, 1);
        assert_eq!(conn.info.context_keys, vec!["files", "stats"]);
    }

    #[test]
    fn user_message_streams_an_echo() {
        let (state, tx, mut rx) = connected();
        let frame = json!({ "type": "user_message", "id": "u1", "content": "hi", "timestamp": 1 });
        handle_text(&state, "c1", &tx, &frame.to_string());

        let frames = drain(&mut rx);
        let Some(InboundFrame::AssistantStart { id: Some(start_id), .. }) = frames.first() else {
            panic!("expected assistant_start, got {:?}", frames);
        };
        assert!(matches!(
            frames.last(),
            Some(InboundFrame::AssistantEnd { id: Some(end_id), .. }) if end_id == start_id
        ));
        let text: String = frames[1..frames.len() - 1]
            .iter()
            .map(|f| match f {
                InboundFrame::AssistantToken { token, .. } => token.as_str(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(text, echo_reply("hi", None, 0));
        assert_eq!(state.connections.get("c1").unwrap().info.user_messages, 1);
    }

    #[test]
    fn ping_gets_pong_and_garbage_gets_error() {
        let (state, tx, mut rx) = connected();
        handle_text(&state, "c1", &tx, r#"{"type":"ping","ts":42}"#);
        handle_text(&state, "c1", &tx, "not json");

        let frames = drain(&mut rx);
        assert_eq!(frames[0], InboundFrame::Pong { ts: Some(42) });
        assert!(matches!(frames[1], InboundFrame::Error { .. }));
    }

    #[test]
    fn pings_are_counted_apart_from_chat_traffic() {
        let (state, tx, mut rx) = connected();
        handle_text(&state, "c1", &tx, r#"{"type":"ping","ts":1}"#);
        handle_text(&state, "c1", &tx, r#"{"type":"ping","ts":2}"#);

        assert_eq!(drain(&mut rx).len(), 2);
        let conn = state.connections.get("c1").unwrap();
        assert_eq!(conn.info.pings, 2);
        assert_eq!(conn.info.user_messages, 0);
        assert_eq!(conn.info.context_updates, 0);
    }
}
