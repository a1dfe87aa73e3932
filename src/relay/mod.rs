//! The fan-out engine
//!
//! A content cycle runs leaf-first through:
//! - [`fetch`] - one content-source call covering every active subscription
//! - [`matcher`] - items x subscriptions -> delivery tasks
//! - [`dispatch`] - delivery with per-recipient failure isolation
//! - [`commit`] - batched watermark advances and counter increments
//!
//! The [`digest`] cycle is independent and touches no watermarks.

mod commit;
mod digest;
mod dispatch;
mod fetch;
mod matcher;
mod traits;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatch::CycleResult;
pub use traits::{ContentSource, MessagingGateway, StatisticsProvider, SubscriptionStore};

use crate::config::Config;
use crate::content_source::SpaceflightNewsClient;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::gateway::TelegramGateway;
use crate::types::{CycleReport, CycleStatus, Event};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard, broadcast};

/// Main relay instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct NewsRelay {
    /// Users, subscriptions and watermarks
    pub(crate) store: Arc<dyn SubscriptionStore>,
    /// Statistics for the digest
    pub(crate) statistics: Arc<dyn StatisticsProvider>,
    /// Where items come from
    pub(crate) source: Arc<dyn ContentSource>,
    /// Where messages go
    pub(crate) gateway: Arc<dyn MessagingGateway>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Recipients served concurrently during dispatch
    max_concurrent_recipients: usize,
    /// Held for the whole content cycle
    content_lock: Arc<Mutex<()>>,
    /// Held for the whole digest cycle
    digest_lock: Arc<Mutex<()>>,
    /// Flag to indicate whether new cycles are accepted (set to false during shutdown)
    accepting_new: Arc<AtomicBool>,
}

impl NewsRelay {
    /// Assemble a relay from its collaborators
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        statistics: Arc<dyn StatisticsProvider>,
        source: Arc<dyn ContentSource>,
        gateway: Arc<dyn MessagingGateway>,
        max_concurrent_recipients: usize,
    ) -> Self {
        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        Self {
            store,
            statistics,
            source,
            gateway,
            event_tx,
            max_concurrent_recipients: max_concurrent_recipients.max(1),
            content_lock: Arc::new(Mutex::new(())),
            digest_lock: Arc::new(Mutex::new(())),
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Build a relay backed by SQLite and the HTTP adapters
    ///
    /// Validates the configuration, opens (and migrates) the database, and
    /// constructs the content-source and gateway clients. Returns the database
    /// handle too, for the CRUD operations the relay itself does not expose.
    pub async fn from_config(config: &Config) -> Result<(Self, Arc<Database>)> {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let source = Arc::new(SpaceflightNewsClient::new(&config.content_source)?);
        let gateway = Arc::new(TelegramGateway::new(&config.gateway)?);

        let relay = Self::new(
            db.clone(),
            db.clone(),
            source,
            gateway,
            config.dispatch.max_concurrent_recipients,
        );

        Ok((relay, db))
    }

    /// Subscribe to relay events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Whether new cycles are still accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting_new.load(Ordering::SeqCst)
    }

    /// Stop accepting new cycles and wait for running ones to finish
    ///
    /// A cycle that is mid-dispatch completes (including its commit) before
    /// this returns.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");
        self.accepting_new.store(false, Ordering::SeqCst);

        let _content = self.content_lock.lock().await;
        let _digest = self.digest_lock.lock().await;

        tracing::info!("Graceful shutdown complete");
    }

    /// Run one content cycle: fetch, match, dispatch, commit
    ///
    /// # Errors
    ///
    /// - [`Error::CycleInProgress`] if another content cycle is running; nothing is fetched
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - a fetch failure ([`Error::ContentSource`] / [`Error::Network`]); nothing was dispatched
    /// - [`Error::Commit`] if deliveries happened but could not be recorded
    pub async fn run_content_cycle(&self) -> Result<CycleReport> {
        let _guard = self.begin_cycle(&self.content_lock, "content")?;

        let cycle_start = Utc::now();
        let result = self.content_cycle(cycle_start).await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    cycle_start = %cycle_start,
                    status = ?report.status,
                    subscriptions = report.subscriptions,
                    items = report.items_fetched,
                    tasks = report.tasks,
                    delivered = report.delivered,
                    skipped = report.skipped,
                    unreachable = report.unreachable_users.len(),
                    transient = report.transient_failures.len(),
                    "content cycle complete"
                );
                self.event_tx
                    .send(Event::CycleCompleted {
                        report: report.clone(),
                    })
                    .ok();
            }
            Err(e) => {
                tracing::error!(
                    cycle_start = %cycle_start,
                    error = %e,
                    code = e.error_code(),
                    "content cycle failed"
                );
                self.event_tx
                    .send(Event::CycleFailed {
                        error: e.to_string(),
                    })
                    .ok();
            }
        }

        result
    }

    /// Take a cycle's run-lock
    ///
    /// The accepting flag is read while the lock is held: `shutdown()` clears the
    /// flag before waiting on the locks, so no cycle can start once it returns.
    pub(crate) fn begin_cycle<'a>(
        &self,
        lock: &'a Mutex<()>,
        kind: &'static str,
    ) -> Result<MutexGuard<'a, ()>> {
        let guard = lock
            .try_lock()
            .map_err(|_| Error::CycleInProgress(kind))?;
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        Ok(guard)
    }

    async fn content_cycle(&self, cycle_start: DateTime<Utc>) -> Result<CycleReport> {
        let subscriptions = self.store.list_active_subscriptions().await?;

        let Some(plan) = fetch::plan_fetch(&subscriptions) else {
            tracing::debug!(cycle_start = %cycle_start, "no active subscriptions, nothing to fetch");
            return Ok(CycleReport::idle(
                cycle_start,
                CycleStatus::NoSubscriptions,
                0,
                0,
            ));
        };

        tracing::debug!(
            cycle_start = %cycle_start,
            providers = ?plan.providers,
            after = %plan.after,
            "fetching content"
        );
        let items = self
            .source
            .fetch_items(&plan.providers, plan.after)
            .await?;

        if items.is_empty() {
            return Ok(CycleReport::idle(
                cycle_start,
                CycleStatus::NoNewItems,
                subscriptions.len(),
                0,
            ));
        }

        let tasks = matcher::match_items(&items, &subscriptions);
        let task_count = tasks.len();

        let result = dispatch::dispatch(
            self.store.as_ref(),
            self.gateway.as_ref(),
            &self.event_tx,
            tasks,
            self.max_concurrent_recipients,
        )
        .await;

        commit::commit(self.store.as_ref(), cycle_start, &result).await?;

        Ok(CycleReport {
            cycle_start,
            status: CycleStatus::Dispatched,
            subscriptions: subscriptions.len(),
            items_fetched: items.len(),
            tasks: task_count,
            delivered: result.delivered_total(),
            skipped: result.skipped,
            unreachable_users: result.unreachable_users.iter().copied().collect(),
            transient_failures: result.transient_users().collect(),
            watermarks_advanced: result.succeeded_subscriptions.len(),
        })
    }
}
