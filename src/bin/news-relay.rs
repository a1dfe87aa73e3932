//! news-relay daemon
//!
//! Usage: `news-relay [config.json]`
//!
//! Log verbosity follows `RUST_LOG` (default `info`). The bot token may be
//! supplied through `NEWS_RELAY_BOT_TOKEN` instead of the configuration file.

use news_relay::{Config, NewsRelay, RelayScheduler, Result, run_with_shutdown};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "news-relay.json";
const BOT_TOKEN_ENV: &str = "NEWS_RELAY_BOT_TOKEN";

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, code = e.error_code(), "news-relay exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = if config_path.exists() {
        Config::from_json_file(&config_path)?
    } else {
        info!(path = %config_path.display(), "config file not found, using defaults");
        Config::default()
    };
    if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
        config.gateway.bot_token = token;
    }

    let (relay, _db) = NewsRelay::from_config(&config).await?;
    let relay = Arc::new(relay);

    info!(
        database = %config.persistence.database_path.display(),
        interval = ?config.schedule.content_interval,
        digest_time = %config.schedule.digest_time,
        "=== news-relay starting ==="
    );

    let scheduler = RelayScheduler::new(relay.clone(), config.schedule.clone());
    let scheduler_handle = tokio::spawn(scheduler.run());

    run_with_shutdown(relay).await;

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "scheduler task panicked");
    }

    info!("news-relay stopped");
    Ok(())
}
