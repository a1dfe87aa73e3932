//! Background trigger for content and digest cycles
//!
//! Content cycles run on a fixed interval aligned to the UTC epoch (with the
//! default one-hour interval: the top of every hour). The digest runs once a
//! day at a configured UTC time of day. When both fall due together the
//! content cycle runs first.
//!
//! # Example
//!
//! ```no_run
//! use news_relay::{NewsRelay, config::Config};
//! use news_relay::schedule::RelayScheduler;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_json_file(std::path::Path::new("news-relay.json"))?;
//! let (relay, _db) = NewsRelay::from_config(&config).await?;
//! let relay = Arc::new(relay);
//!
//! let scheduler = RelayScheduler::new(relay.clone(), config.schedule.clone());
//!
//! // Run scheduler (returns after relay.shutdown())
//! tokio::spawn(async move {
//!     scheduler.run().await;
//! });
//! # Ok(())
//! # }
//! ```

use crate::config::ScheduleConfig;
use crate::{Error, NewsRelay};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

/// Longest single sleep, so shutdown is noticed promptly
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// First instant strictly after `now` that is a whole multiple of `interval` since the epoch
pub fn next_interval_tick(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).max(1);
    let now_ms = now.timestamp_millis();
    let next_ms = now_ms.div_euclid(step).saturating_add(1).saturating_mul(step);
    DateTime::from_timestamp_millis(next_ms).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Top of the next UTC hour
pub fn next_hourly_tick(now: DateTime<Utc>) -> DateTime<Utc> {
    next_interval_tick(now, Duration::from_secs(3600))
}

/// Next occurrence of `time` (UTC) strictly after `now`
pub fn next_daily_at(now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Drives a [`NewsRelay`] on its configured schedule
pub struct RelayScheduler {
    relay: Arc<NewsRelay>,
    schedule: ScheduleConfig,
}

impl RelayScheduler {
    /// Creates a new scheduler
    pub fn new(relay: Arc<NewsRelay>, schedule: ScheduleConfig) -> Self {
        Self { relay, schedule }
    }

    /// Starts the scheduler loop
    ///
    /// Returns once the relay stops accepting new cycles (see
    /// [`NewsRelay::shutdown`]). Cycle failures are logged by the relay and
    /// never stop the loop.
    pub async fn run(self) {
        info!(
            interval = ?self.schedule.content_interval,
            digest_time = %self.schedule.digest_time,
            digest_enabled = self.schedule.digest_enabled,
            "Relay scheduler started"
        );

        loop {
            let now = Utc::now();
            let next_content = next_interval_tick(now, self.schedule.content_interval);
            let next_digest = self
                .schedule
                .digest_enabled
                .then(|| next_daily_at(now, self.schedule.digest_time));

            let wake_at = match next_digest {
                Some(digest) if digest < next_content => digest,
                _ => next_content,
            };
            debug!(%next_content, ?next_digest, "sleeping until next cycle");

            if !self.sleep_until(wake_at).await {
                break;
            }

            if next_content <= wake_at && !self.run_content().await {
                break;
            }
            if next_digest.is_some_and(|digest| digest <= wake_at) && !self.run_digest().await {
                break;
            }
        }

        info!("Relay scheduler stopped");
    }

    /// Sleep until `target`, waking at least once per second to check for shutdown
    ///
    /// Returns `false` if shutdown was requested.
    async fn sleep_until(&self, target: DateTime<Utc>) -> bool {
        loop {
            if !self.relay.is_accepting() {
                info!("Relay scheduler shutting down");
                return false;
            }
            let remaining = match (target - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => return true,
            };
            sleep(remaining.min(SHUTDOWN_POLL)).await;
        }
    }

    /// Returns `false` if the relay is shutting down
    async fn run_content(&self) -> bool {
        match self.relay.run_content_cycle().await {
            Ok(_) => true,
            Err(Error::ShuttingDown) => false,
            Err(Error::CycleInProgress(kind)) => {
                warn!(kind, "previous cycle still running, skipping tick");
                true
            }
            // Already logged with context by the relay
            Err(_) => true,
        }
    }

    async fn run_digest(&self) -> bool {
        match self.relay.run_digest_cycle().await {
            Ok(_) => true,
            Err(Error::ShuttingDown) => false,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "digest cycle failed");
                true
            }
        }
    }
}
