//! Console Tail binary.
//!
//! Connects to the console's realtime endpoint, logs every event, and sends
//! each stdin line as a text message.

use std::env;

use anyhow::Context;
use console_realtime::{RealtimeClient, RealtimeConfig, TokenStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,console_realtime=debug,console_tail=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = RealtimeConfig::from_env().context("invalid realtime configuration")?;
    let tokens = TokenStore::new();
    if let Ok(token) = env::var("ACCESS_TOKEN") {
        tokens.set_access_token(token);
    }

    tracing::info!("Starting console tail");
    tracing::info!(
        "Endpoint: {}",
        config.endpoint.as_deref().unwrap_or("<unset>")
    );
    tracing::info!(
        "Reconnect budget: {} attempts, {:?} apart",
        config.max_reconnect_attempts,
        config.reconnect_delay
    );

    let client = RealtimeClient::with_tungstenite(config, tokens)?;

    client.on_open(|open| tracing::info!("Connected to {}", open.url));
    client.on_close(|close| {
        tracing::info!("Closed: code={} reason={:?}", close.code, close.reason);
    });
    client.on_error(|err| tracing::warn!("Error: {}", err.error));
    client.on_message(|message| match message.payload.as_text() {
        Some(text) => tracing::info!("<< {}", text),
        None => tracing::info!("<< {} binary bytes", message.payload.len()),
    });

    client.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match client.send(line) {
                    Ok(()) => {}
                    Err(e) if e.is_transient_send() => tracing::warn!("Not sent: {}", e),
                    Err(e) => return Err(e.into()),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down console tail");
    client.close();

    let metrics = client.metrics().snapshot();
    tracing::info!(
        "Session: {} opens, {} messages in, {} messages out, {} reconnects",
        metrics.opens,
        metrics.messages_received,
        metrics.messages_sent,
        metrics.reconnects_scheduled
    );

    Ok(())
}
