//! Events delivered to the session task.
//!
//! Socket drivers and timers never touch session state themselves; they post
//! a [`SessionEvent`] into one unbounded channel and the session processes
//! the events one at a time, in arrival order.

use tokio::sync::mpsc;

/// Lifecycle and traffic of one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Error(String),
    Closed,
}

/// Identifies a scheduled timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Reconnect,
    ContextAck(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `generation` identifies the socket the event came from; events of a
    /// socket that has since been replaced are ignored.
    Socket { generation: u64, event: SocketEvent },

    /// `seq` identifies one registration of `key`, so a fire that raced
    /// with a cancellation can be told apart from the current timer.
    Timer { key: TimerKey, seq: u64 },
}

pub type EventTx = mpsc::UnboundedSender<SessionEvent>;
pub type EventRx = mpsc::UnboundedReceiver<SessionEvent>;
