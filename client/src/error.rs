//! Error types for the chat session layer.
//!
//! [`SessionError`] is never returned to callers of the session: it is
//! stored as `last_error` in the [`SessionSnapshot`](crate::SessionSnapshot)
//! so the UI can render it. The other enums are ordinary `Result` errors
//! for configuration and storage.

use serde::Serialize;

/// How prominently an error should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Observable error state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SessionError {
    /// Socket-level failure. Retried automatically while attempts remain.
    #[error("{0}")]
    Connection(String),

    /// `error` frame sent by the backend.
    #[error("server error: {0}")]
    Server(String),

    /// A context update was not acknowledged in time.
    #[error("context sync timed out, continuing with current context")]
    SyncTimeout,

    /// Automatic reconnection gave up; a manual reconnect is required.
    #[error("connection lost after {attempts} reconnect attempts")]
    ExhaustedRetries { attempts: u32 },
}

impl SessionError {
    pub fn severity(&self) -> Severity {
        match self {
            SessionError::SyncTimeout => Severity::Low,
            SessionError::Connection(_) | SessionError::Server(_) => Severity::Medium,
            SessionError::ExhaustedRetries { .. } => Severity::High,
        }
    }

    /// Whether the session recovers from this error on its own.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SessionError::ExhaustedRetries { .. })
    }
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid value for {name}: '{value}'")]
    InvalidVar { name: &'static str, value: String },
}

/// Failures of a transcript storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt transcript: {0}")]
    Corrupt(#[from] serde_json::Error),
}
