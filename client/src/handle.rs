//! # Session Handle
//!
//! Runs a [`ChatSession`] on its own task and exposes it through a cheap,
//! cloneable [`SessionHandle`].
//!
//! The task is the only place session state is touched. It waits on two
//! inputs at once:
//!
//! - **commands** sent by handles (connect, send, merge context, …)
//! - **events** posted by socket drivers and timers
//!
//! and after each one publishes a fresh [`SessionSnapshot`] on a `watch`
//! channel. Observers either poll [`SessionHandle::snapshot`] or await
//! changes through [`SessionHandle::subscribe`].
//!
//! The task ends on [`SessionHandle::shutdown`] or once every handle has
//! been dropped; either way the socket is closed and all timers cancelled.

use chat_protocol::Context;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::connection::Connector;
use crate::event::EventRx;
use crate::session::{ChatSession, SentMessage};
use crate::state::{Role, SessionSnapshot};
use crate::store::TranscriptBackend;

/// Returned when the session task is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("chat session has shut down")]
pub struct SessionClosed;

enum Command {
    Connect,
    Reconnect,
    Disconnect,
    SendUserMessage {
        text: String,
        context: Option<Context>,
        reply: oneshot::Sender<Option<SentMessage>>,
    },
    MergeContext(Context),
    AddLocalMessage {
        role: Role,
        content: String,
        reply: oneshot::Sender<String>,
    },
    Clear,
    DismissError,
    Shutdown,
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Builds the session (restoring any persisted transcript) and spawns
    /// its task. Must be called inside a Tokio runtime.
    pub fn spawn(
        config: &SessionConfig,
        connector: Arc<dyn Connector>,
        backend: Box<dyn TranscriptBackend>,
    ) -> (Self, JoinHandle<()>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let session = ChatSession::new(config, connector, backend, event_tx);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let task = tokio::spawn(run_session(session, command_rx, event_rx, snapshot_tx));
        let handle = Self {
            commands: command_tx,
            snapshots: snapshot_rx,
        };
        (handle, task)
    }

    pub fn connect(&self) -> Result<(), SessionClosed> {
        self.command(Command::Connect)
    }

    /// Reconnects with a fresh retry budget. Use after automatic
    /// reconnection gave up.
    pub fn reconnect(&self) -> Result<(), SessionClosed> {
        self.command(Command::Reconnect)
    }

    pub fn disconnect(&self) -> Result<(), SessionClosed> {
        self.command(Command::Disconnect)
    }

    /// Appends a user message and sends it, queueing while offline.
    ///
    /// Resolves to `None` for blank input.
    pub async fn send_user_message(
        &self,
        text: impl Into<String>,
        context: Option<Context>,
    ) -> Result<Option<SentMessage>, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SendUserMessage {
            text: text.into(),
            context,
            reply,
        })?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub fn merge_context(&self, fragment: Context) -> Result<(), SessionClosed> {
        self.command(Command::MergeContext(fragment))
    }

    /// Adds a transcript entry without network traffic and returns its id.
    pub async fn add_local_message(
        &self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<String, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::AddLocalMessage {
            role,
            content: content.into(),
            reply,
        })?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub fn clear(&self) -> Result<(), SessionClosed> {
        self.command(Command::Clear)
    }

    pub fn dismiss_error(&self) -> Result<(), SessionClosed> {
        self.command(Command::DismissError)
    }

    /// Stops the session task. Other handles see [`SessionClosed`] from
    /// then on.
    pub fn shutdown(&self) -> Result<(), SessionClosed> {
        self.command(Command::Shutdown)
    }

    /// The most recently published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that is notified after every processed command or event.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    fn command(&self, command: Command) -> Result<(), SessionClosed> {
        self.commands.send(command).map_err(|_| SessionClosed)
    }
}

async fn run_session(
    mut session: ChatSession,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: EventRx,
    snapshots: watch::Sender<SessionSnapshot>,
) {
    info!("Chat session started");
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All session handles dropped");
                    break;
                };
                if !apply_command(&mut session, command) {
                    break;
                }
            }
            // The session holds a sender, so this never yields None.
            Some(event) = events.recv() => session.handle_event(event),
        }
        snapshots.send_replace(session.snapshot());
    }

    session.teardown();
    snapshots.send_replace(session.snapshot());
    info!("Chat session stopped");
}

/// Returns `false` when the task should stop.
fn apply_command(session: &mut ChatSession, command: Command) -> bool {
    match command {
        Command::Connect => session.connect(),
        Command::Reconnect => session.reconnect(),
        Command::Disconnect => session.disconnect(),
        Command::SendUserMessage {
            text,
            context,
            reply,
        } => {
            let _ = reply.send(session.send_user_message(&text, context));
        }
        Command::MergeContext(fragment) => session.merge_context(fragment),
        Command::AddLocalMessage {
            role,
            content,
            reply,
        } => {
            let _ = reply.send(session.add_local_message(role, content));
        }
        Command::Clear => session.clear(),
        Command::DismissError => session.dismiss_error(),
        Command::Shutdown => return false,
    }
    true
}
