use anyhow::Context;
use chat_devserver::AppState;
use std::net::SocketAddr;
use tracing::info;

const DEFAULT_ADDR: &str = "0.0.0.0:7070";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_devserver=info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var("CHAT_DEVSERVER_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("CHAT_DEVSERVER_ADDR must be host:port")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Chat dev server listening on {}", addr);

    chat_devserver::serve(listener, AppState::new()).await?;
    Ok(())
}
