//! # Connection Manager
//!
//! Owns the lifecycle of one logical connection to the chat backend:
//!
//! ```text
//! idle ──connect()──→ connecting ──opened──→ open
//!                         │                   │
//!                       error ←──────────────┤
//!                         ↓                   ↓
//!                       closed ──timer──→ reconnecting ──opened──→ open
//! ```
//!
//! While the connection is not open, [`ConnectionManager::send`] parks
//! frames in a FIFO queue and triggers a connect. The queue is drained in
//! order as part of handling the `Opened` event, so queued frames always
//! reach the socket before anything submitted afterwards.
//!
//! After a close, the Nth automatic reconnect is scheduled
//! `base_delay * N` later, up to `max_attempts` times. Once exhausted the
//! manager stays closed until [`ConnectionManager::reconnect`] is called.

use chat_protocol::{encode, OutboundFrame};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::event::{EventTx, SocketEvent, TimerKey};
use crate::state::ConnectionState;
use crate::timers::TimerRegistry;

// ─── Socket Seam ────────────────────────────────────────────────

/// Opens sockets on behalf of the manager.
///
/// Implementations spawn whatever task drives the socket and report its
/// lifecycle by posting [`SocketEvent`]s tagged with `generation`.
pub trait Connector: Send + Sync {
    fn open(&self, url: &str, generation: u64, events: EventTx) -> SocketHandle;
}

/// The manager's end of a live socket: outbound text goes into `outbound`,
/// which the driver task writes to the wire in order.
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<String>,
    task: Option<JoinHandle<()>>,
}

impl SocketHandle {
    pub fn new(outbound: mpsc::UnboundedSender<String>, task: Option<JoinHandle<()>>) -> Self {
        Self { outbound, task }
    }

    fn transmit(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }

    /// Drops the outbound channel, which tells the driver to send a close
    /// frame and exit.
    fn close(self) {
        drop(self.outbound);
        drop(self.task);
    }
}

// ─── Outcomes ───────────────────────────────────────────────────

/// What [`ConnectionManager::send`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the open socket.
    Sent,
    /// Parked until the connection opens.
    Queued,
    /// Not worth replaying later (heartbeats) and the socket is not open.
    Dropped,
}

/// Lifecycle change caused by a socket event, for the session to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Opened { flushed: usize },
    Inbound(String),
    Failed(String),
    Closed { retry: Option<Retry> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub attempt: u32,
    pub delay: Duration,
}

/// Reconnect settings taken from [`SessionConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            enabled: config.reconnect,
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.reconnect_base_delay(),
        }
    }

    /// Linear backoff: attempt N waits `base_delay * N`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

// ─── Manager ────────────────────────────────────────────────────

pub struct ConnectionManager {
    endpoint: String,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    events: EventTx,
    timers: TimerRegistry,

    state: ConnectionState,
    socket: Option<SocketHandle>,
    /// Bumped for every socket opened; events from older sockets are stale.
    generation: u64,
    attempts: u32,
    queue: VecDeque<OutboundFrame>,
}

impl ConnectionManager {
    pub fn new(
        endpoint: impl Into<String>,
        policy: ReconnectPolicy,
        connector: Arc<dyn Connector>,
        events: EventTx,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            policy,
            connector,
            timers: TimerRegistry::new(events.clone()),
            events,
            state: ConnectionState::Idle,
            socket: None,
            generation: 0,
            attempts: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_reconnect_scheduled(&self) -> bool {
        self.timers.is_registered(&TimerKey::Reconnect)
    }

    /// Opens a socket unless one is already connecting or open.
    ///
    /// Returns whether a new socket was requested.
    pub fn connect(&mut self) -> bool {
        if self.socket.is_some() && self.state.is_live() {
            return false;
        }
        self.timers.cancel(&TimerKey::Reconnect);
        if let Some(stale) = self.socket.take() {
            stale.close();
        }

        self.generation += 1;
        self.state = if self.attempts > 0 {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };
        info!(
            "Connecting to {} (generation {}, attempt {})",
            self.endpoint, self.generation, self.attempts
        );
        self.socket = Some(
            self.connector
                .open(&self.endpoint, self.generation, self.events.clone()),
        );
        true
    }

    /// User-initiated reconnect: forgets previous attempts so a fresh
    /// backoff budget applies, then connects.
    pub fn reconnect(&mut self) -> bool {
        self.attempts = 0;
        self.connect()
    }

    /// Closes the socket and cancels any scheduled reconnect. Idempotent.
    pub fn disconnect(&mut self) {
        self.timers.cancel_all();
        if let Some(socket) = self.socket.take() {
            info!("Disconnecting from {}", self.endpoint);
            socket.close();
        }
        self.state = ConnectionState::Closed;
    }

    /// Transmits `frame` if the connection is open, otherwise queues it and
    /// starts connecting.
    pub fn send(&mut self, frame: OutboundFrame) -> Delivery {
        if self.state == ConnectionState::Open {
            if let Some(socket) = &self.socket {
                match encode(&frame) {
                    Ok(text) => {
                        if socket.transmit(text) {
                            debug!("Sent {} frame", frame.kind());
                            return Delivery::Sent;
                        }
                        warn!("Socket writer gone; treating connection as down");
                    }
                    Err(e) => {
                        error!("Dropping unserializable {} frame: {}", frame.kind(), e);
                        return Delivery::Dropped;
                    }
                }
            }
        }

        if !frame.is_queueable() {
            return Delivery::Dropped;
        }
        debug!("Queueing {} frame until connected", frame.kind());
        self.queue.push_back(frame);
        self.connect();
        Delivery::Queued
    }

    /// Applies a socket lifecycle event.
    ///
    /// Returns `None` for events of a socket that was already replaced.
    pub fn handle_socket(&mut self, generation: u64, event: SocketEvent) -> Option<Transition> {
        if generation != self.generation || self.socket.is_none() {
            debug!("Ignoring {:?} from stale socket generation {}", event, generation);
            return None;
        }

        match event {
            SocketEvent::Opened => {
                info!("Connected to {}", self.endpoint);
                self.state = ConnectionState::Open;
                self.attempts = 0;
                let flushed = self.flush();
                Some(Transition::Opened { flushed })
            }
            SocketEvent::Message(text) => Some(Transition::Inbound(text)),
            SocketEvent::Error(message) => {
                error!("Connection error: {}", message);
                self.state = ConnectionState::Error;
                Some(Transition::Failed(message))
            }
            SocketEvent::Closed => {
                self.socket = None;
                self.state = ConnectionState::Closed;
                let retry = self.schedule_reconnect();
                Some(Transition::Closed { retry })
            }
        }
    }

    /// Consumes a reconnect timer fire.
    pub fn handle_timer(&mut self, seq: u64) {
        if self.timers.fired(&TimerKey::Reconnect, seq) {
            self.connect();
        }
    }

    fn schedule_reconnect(&mut self) -> Option<Retry> {
        if !self.policy.enabled {
            info!("Connection closed; automatic reconnect disabled");
            return None;
        }
        if self.attempts >= self.policy.max_attempts {
            warn!(
                "Connection closed; giving up after {} reconnect attempts",
                self.attempts
            );
            return None;
        }

        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        info!(
            "Connection closed; reconnect attempt {} in {:?}",
            self.attempts, delay
        );
        self.timers.register(TimerKey::Reconnect, delay);
        Some(Retry {
            attempt: self.attempts,
            delay,
        })
    }

    /// Drains the offline queue into the socket, oldest first.
    fn flush(&mut self) -> usize {
        let Some(socket) = &self.socket else {
            return 0;
        };
        let mut flushed = 0;
        while let Some(frame) = self.queue.pop_front() {
            let text = match encode(&frame) {
                Ok(text) => text,
                Err(e) => {
                    error!("Dropping unserializable {} frame: {}", frame.kind(), e);
                    continue;
                }
            };
            if !socket.transmit(text) {
                self.queue.push_front(frame);
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            info!("Flushed {} queued frame(s)", flushed);
        }
        flushed
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
