//! # news-relay
//!
//! Scheduled news fan-out engine: fetches new articles once per cycle and
//! delivers them to every subscriber, tracking a per-subscription watermark so
//! nothing is delivered twice and nothing is silently skipped.
//!
//! ## Design Philosophy
//!
//! - **One fetch per cycle** - a single content-source request covers every active subscription
//! - **Failure isolation** - a failing recipient never affects another recipient
//! - **Batched commits** - watermarks and counters are written once per cycle, after dispatch
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use news_relay::{Config, NewsRelay};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.gateway.bot_token = "123:ABC".to_string();
//!
//!     let (relay, db) = NewsRelay::from_config(&config).await?;
//!
//!     // Subscribe to events
//!     let mut events = relay.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     db.activate_user(news_relay::UserId(42), chrono::Utc::now()).await?;
//!     let report = relay.run_content_cycle().await?;
//!     println!("delivered {}", report.delivered);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// News API client
pub mod content_source;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Messaging bot API client
pub mod gateway;
/// Fan-out engine (fetch, match, dispatch, commit, digest)
pub mod relay;
/// Background cycle scheduling
pub mod schedule;
/// Core types and events
pub mod types;

use std::sync::Arc;

// Re-export commonly used types
pub use config::Config;
pub use content_source::SpaceflightNewsClient;
pub use db::{Database, Statistics};
pub use error::{DatabaseError, Error, Result};
pub use gateway::TelegramGateway;
pub use relay::{
    ContentSource, CycleResult, MessagingGateway, NewsRelay, StatisticsProvider,
    SubscriptionStore,
};
pub use schedule::RelayScheduler;
pub use types::{
    ContentItem, CycleReport, CycleStatus, DeliveryOutcome, DeliveryTask, DigestReport, Event,
    Provider, SubscribeOutcome, Subscription, SubscriptionId, User, UserActivation, UserId,
    UserRole,
};

/// Helper function to run the relay with graceful signal handling.
///
/// Waits for a termination signal and then calls the relay's `shutdown()` method,
/// which lets a running cycle finish its dispatch and commit.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use news_relay::{Config, NewsRelay, RelayScheduler, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::from_json_file(std::path::Path::new("news-relay.json"))?;
///     let (relay, _db) = NewsRelay::from_config(&config).await?;
///     let relay = Arc::new(relay);
///
///     tokio::spawn(RelayScheduler::new(relay.clone(), config.schedule.clone()).run());
///
///     // Run with automatic signal handling
///     run_with_shutdown(relay).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(relay: Arc<NewsRelay>) {
    wait_for_signal().await;
    relay.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
