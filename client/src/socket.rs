//! # WebSocket Driver
//!
//! The production [`Connector`]: one tokio task per socket that
//! - connects with `tokio-tungstenite`
//! - writes queued outbound text in order
//! - forwards every inbound text frame as [`SocketEvent::Message`]
//! - sends a heartbeat `ping` frame on a fixed interval
//!
//! The task never decides anything about reconnection. It reports
//! `Opened`, `Error` and `Closed` and leaves the rest to the
//! [`ConnectionManager`](crate::connection::ConnectionManager).

use chat_protocol::{encode, OutboundFrame};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::connection::{Connector, SocketHandle};
use crate::event::{EventTx, SessionEvent, SocketEvent};
use crate::state::now_millis;

/// Interval used when heartbeats are disabled; the branch is never polled.
const IDLE_TICK: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    heartbeat: Option<Duration>,
}

impl WsConnector {
    pub fn new(heartbeat: Option<Duration>) -> Self {
        Self { heartbeat }
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str, generation: u64, events: EventTx) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let task = tokio::spawn(drive_socket(
            url.to_string(),
            generation,
            events,
            rx,
            self.heartbeat,
        ));
        SocketHandle::new(tx, Some(task))
    }
}

/// Runs one socket from connect to close.
///
/// ## Lifecycle
/// 1. Connect; on failure report `Error` + `Closed` and stop
/// 2. Report `Opened`, split the stream
/// 3. Loop over outbound text, inbound frames and heartbeat ticks
/// 4. When the manager drops its sender, send a close frame and stop
/// 5. Report `Closed`
async fn drive_socket(
    url: String,
    generation: u64,
    events: EventTx,
    mut outbound: mpsc::UnboundedReceiver<String>,
    heartbeat: Option<Duration>,
) {
    let post = |event: SocketEvent| {
        let _ = events.send(SessionEvent::Socket { generation, event });
    };

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            error!("Connection to {} failed: {}", url, e);
            post(SocketEvent::Error(format!("Connection failed: {}", e)));
            post(SocketEvent::Closed);
            return;
        }
    };
    info!("Socket {} open", generation);
    post(SocketEvent::Opened);

    let (mut sink, mut stream) = ws_stream.split();
    let period = heartbeat.unwrap_or(IDLE_TICK);
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            // ── Outbound ──
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!("Write on socket {} failed: {}", generation, e);
                        post(SocketEvent::Error(format!("Send failed: {}", e)));
                        break;
                    }
                }
                None => {
                    // The manager let go of this socket.
                    debug!("Closing socket {}", generation);
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },

            // ── Heartbeat ──
            _ = ticker.tick(), if heartbeat.is_some() => {
                match encode(&OutboundFrame::Ping { ts: now_millis() }) {
                    Ok(text) => {
                        trace!("Heartbeat on socket {}", generation);
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            post(SocketEvent::Error("Heartbeat failed".to_string()));
                            break;
                        }
                    }
                    Err(e) => error!("Failed to encode heartbeat: {}", e),
                }
            }

            // ── Inbound ──
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => post(SocketEvent::Message(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => post(SocketEvent::Message(text)),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("Server closed socket {}: {:?}", generation, frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Socket {} error: {}", generation, e);
                    post(SocketEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    post(SocketEvent::Closed);
}
