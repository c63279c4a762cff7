//! # chat-cli
//!
//! Terminal client for the chat session layer. Lines typed on stdin are
//! sent as user messages; streamed replies are printed as they arrive.
//!
//! ## Commands
//! - `/context {json}`: merge a JSON object into the session context
//! - `/reconnect`: reconnect after automatic retries gave up
//! - `/disconnect`: close the connection (the next message reopens it)
//! - `/clear`: wipe the transcript
//! - `/quit`: exit

use anyhow::{bail, Context as _};
use chat_session::{
    Context, FileBackend, MemoryBackend, Role, SessionConfig, SessionHandle, SessionSnapshot,
    TranscriptBackend, WsConnector,
};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "chat-cli", version, about = "Chat with a realtime backend over WebSocket")]
struct Args {
    /// WebSocket URL of the chat backend (overrides CHAT_WS_URL).
    #[arg(long)]
    url: Option<String>,

    /// Automatic reconnect attempts before giving up.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Base reconnect delay in milliseconds; attempt N waits N times this.
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// Persist the transcript in this directory instead of memory.
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Do not reconnect automatically when the connection drops.
    #[arg(long)]
    no_reconnect: bool,
}

impl Args {
    fn apply(self, config: &mut SessionConfig) {
        if let Some(url) = self.url {
            config.endpoint = url;
        }
        if let Some(max) = self.max_attempts {
            config.max_reconnect_attempts = max;
        }
        if let Some(ms) = self.base_delay_ms {
            config.reconnect_base_delay_ms = ms;
        }
        if let Some(dir) = self.store_dir {
            config.store_dir = Some(dir);
        }
        if self.no_reconnect {
            config.reconnect = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_session=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = SessionConfig::from_env().context("reading CHAT_* environment")?;
    Args::parse().apply(&mut config);
    config.validate()?;

    let backend: Box<dyn TranscriptBackend> = match &config.store_dir {
        Some(dir) => Box::new(FileBackend::new(dir)),
        None => Box::new(MemoryBackend::default()),
    };
    let connector = Arc::new(WsConnector::new(config.heartbeat_interval()));
    let (session, task) = SessionHandle::spawn(&config, connector, backend);

    let history = session.snapshot().messages;
    for message in &history {
        println!("{}{}", prefix(message.role), message.content);
    }
    info!("Connecting to {}", config.endpoint);
    session.connect()?;

    let renderer = tokio::spawn(render(session.subscribe(), history.len()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match run_line(&session, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("! {:#}", e),
        }
    }

    session.shutdown()?;
    task.await?;
    renderer.abort();
    Ok(())
}

/// Handles one input line. Returns `false` to quit.
async fn run_line(session: &SessionHandle, line: &str) -> anyhow::Result<bool> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "/quit" | "/exit" => return Ok(false),
        "/reconnect" => session.reconnect()?,
        "/disconnect" => session.disconnect()?,
        "/clear" => session.clear()?,
        "/context" => session.merge_context(parse_context(rest)?)?,
        other if other.starts_with('/') => bail!("unknown command {}", other),
        _ => {
            session.send_user_message(line, None).await?;
        }
    }
    Ok(true)
}

fn parse_context(json: &str) -> anyhow::Result<Context> {
    match serde_json::from_str::<serde_json::Value>(json).context("context must be JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("context must be a JSON object"),
    }
}

fn prefix(role: Role) -> &'static str {
    match role {
        Role::User => "> ",
        Role::Assistant => "",
        Role::System => "* ",
    }
}

/// Prints transcript growth as snapshots arrive. Streaming messages are
/// written incrementally; user input is not echoed.
async fn render(mut snapshots: watch::Receiver<SessionSnapshot>, already_shown: usize) {
    let mut shown = already_shown;
    // Bytes of `messages[shown]` already printed while it streams.
    let mut partial = 0;
    let mut connection = snapshots.borrow().connection;
    let mut last_error = None;

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();

        if snapshot.connection != connection {
            connection = snapshot.connection;
            eprintln!("[{:?}]", connection);
        }
        if snapshot.last_error != last_error {
            if let Some(e) = &snapshot.last_error {
                eprintln!("! {}", e);
            }
            last_error = snapshot.last_error.clone();
        }

        if snapshot.messages.len() < shown {
            shown = 0;
            partial = 0;
        }
        let last = snapshot.messages.len().saturating_sub(1);
        let mut out = std::io::stdout().lock();
        for (i, message) in snapshot.messages.iter().enumerate().skip(shown) {
            let streaming = snapshot.is_streaming && i == last;
            if message.role != Role::User {
                if partial == 0 {
                    let _ = write!(out, "{}", prefix(message.role));
                }
                let _ = write!(out, "{}", message.content.get(partial..).unwrap_or(""));
            }
            if streaming {
                partial = message.content.len();
                break;
            }
            if message.role != Role::User {
                let _ = writeln!(out);
            }
            shown = i + 1;
            partial = 0;
        }
        let _ = out.flush();
    }
}
