//! # Chat Session
//!
//! Client-side session layer for a realtime chat backend reached over a
//! WebSocket. It keeps one logical connection alive, reassembles streamed
//! assistant replies into a transcript, and keeps the backend's view of the
//! application context in sync.
//!
//! ## Module Structure
//!
//! - [`session`]: [`ChatSession`], the synchronous facade composing the parts below
//! - [`handle`]: [`SessionHandle`], runs a session on its own task
//! - [`connection`]: connection lifecycle, offline queue, reconnect backoff
//! - [`socket`]: `tokio-tungstenite` driver ([`WsConnector`])
//! - [`assembler`]: inbound frames → transcript
//! - [`context`]: deduplicated, acknowledged context updates
//! - [`store`]: transcript persistence backends
//! - [`timers`]: cancellable one-shot timers posting into the session
//! - [`config`], [`error`], [`event`], [`state`]: shared types
//!
//! ```no_run
//! use chat_session::{MemoryBackend, SessionConfig, SessionHandle, WsConnector};
//! use std::sync::Arc;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = SessionConfig::from_env()?;
//! let connector = Arc::new(WsConnector::new(config.heartbeat_interval()));
//! let (session, _task) = SessionHandle::spawn(&config, connector, Box::new(MemoryBackend::default()));
//! session.connect()?;
//! session.send_user_message("Summarize page 2", None).await?;
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod compat;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod event;
pub mod handle;
pub mod session;
pub mod socket;
pub mod state;
pub mod store;
pub mod timers;

#[cfg(test)]
mod test_support;

pub use chat_protocol::Context;
pub use config::SessionConfig;
pub use connection::{Connector, SocketHandle};
pub use error::{ConfigError, SessionError, Severity, StoreError};
pub use handle::{SessionClosed, SessionHandle};
pub use session::{ChatSession, SentMessage};
pub use socket::WsConnector;
pub use state::{ChatMessage, ConnectionState, Role, SessionSnapshot};
pub use store::{FileBackend, MemoryBackend, TranscriptBackend};
