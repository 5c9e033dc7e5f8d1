mod config;
mod github;
mod platform;
mod products;
mod router;
mod server;
mod trigger;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::platform::telegram::Allowlist;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,command_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("gateway.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Bind address: {}", config.server.bind_addr);
    info!("  Dispatch event type: {}", config.github.event_type);
    info!(
        "  Dispatch backend: {}",
        if config.github.connection().is_some() { "configured" } else { "missing" }
    );

    if config.telegram.bot_token().is_none() {
        warn!("TELEGRAM_BOT_TOKEN is not set; the webhook will answer 500");
    }
    if config.telegram.webhook_secret().is_none() {
        warn!("TELEGRAM_WEBHOOK_SECRET is not set; webhook deliveries are not authenticated");
    }
    if Allowlist::parse(&config.telegram.allowed_chat_ids).is_empty() {
        warn!("TELEGRAM_ALLOWED_CHAT_IDS is empty; every chat may run commands");
    }
    if config.trigger.secret().is_none() {
        warn!("SCAN_TRIGGER_SECRET is not set; the scan trigger will answer 500");
    }

    let state = AppState::new(config);

    info!("Gateway is starting...");
    server::serve(state).await?;

    Ok(())
}
