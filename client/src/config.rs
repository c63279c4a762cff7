//! # Session Configuration
//!
//! Values a session is constructed with. The endpoint normally comes from
//! the environment; the reconnect policy is supplied by the caller.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default chat backend URL. Used when no custom URL is set.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:7070/ws";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WebSocket URL of the chat backend.
    pub endpoint: String,

    /// Whether lost connections are re-established automatically.
    pub reconnect: bool,

    pub max_reconnect_attempts: u32,

    /// The Nth reconnect is scheduled `N * reconnect_base_delay_ms` after
    /// the connection closed.
    pub reconnect_base_delay_ms: u64,

    /// How long a context update may stay unacknowledged.
    pub context_ack_timeout_ms: u64,

    /// Interval between heartbeat pings; `0` disables them.
    pub heartbeat_interval_secs: u64,

    /// Accept assistant messages starting with the legacy acknowledgment
    /// text as an ack for every pending context update.
    pub legacy_text_ack: bool,

    /// Directory for the file-backed transcript store. In-memory when unset.
    pub store_dir: Option<PathBuf>,

    /// Distinguishes independent sessions sharing one store.
    pub session_scope: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            context_ack_timeout_ms: 10_000,
            heartbeat_interval_secs: 30,
            legacy_text_ack: true,
            store_dir: None,
            session_scope: "default".to_string(),
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `CHAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CHAT_WS_URL") {
            config.endpoint = url;
        }
        if let Some(value) = lookup("CHAT_RECONNECT") {
            config.reconnect = parse_bool("CHAT_RECONNECT", &value)?;
        }
        if let Some(value) = lookup("CHAT_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = parse_num("CHAT_MAX_RECONNECT_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("CHAT_RECONNECT_BASE_DELAY_MS") {
            config.reconnect_base_delay_ms = parse_num("CHAT_RECONNECT_BASE_DELAY_MS", &value)?;
        }
        if let Some(dir) = lookup("CHAT_STORE_DIR") {
            config.store_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that the endpoint is a usable `ws://` or `wss://` URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            url: self.endpoint.clone(),
            reason,
        };
        let url = url::Url::parse(&self.endpoint).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(invalid(format!("unsupported scheme '{}'", other))),
        }
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn context_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.context_ack_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidVar {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        name,
        value: value.to_string(),
    })
}
