//! Daily statistics digest for admins.

use crate::error::Result;
use crate::types::{DigestReport, Event};

use super::NewsRelay;

impl NewsRelay {
    /// Send the statistics report to every active admin
    ///
    /// Admins are independent one-shot deliveries: a failure for one admin is
    /// logged and the others are still attempted. Nothing is written back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleInProgress`](crate::Error::CycleInProgress) if a digest is already running,
    /// [`Error::ShuttingDown`](crate::Error::ShuttingDown) after [`shutdown`](Self::shutdown), or the store
    /// error if admins or statistics cannot be read.
    pub async fn run_digest_cycle(&self) -> Result<DigestReport> {
        let _guard = self.begin_cycle(&self.digest_lock, "digest")?;

        let admins = self.store.list_admins().await?;
        if admins.is_empty() {
            tracing::info!("no admins registered, skipping digest");
            let report = DigestReport::default();
            self.event_tx
                .send(Event::DigestCompleted {
                    report: report.clone(),
                })
                .ok();
            return Ok(report);
        }

        let text = self.statistics.compute_statistics_report().await?;

        let mut report = DigestReport {
            admins: admins.len(),
            ..DigestReport::default()
        };

        for admin in &admins {
            let outcome = self.gateway.send(admin.id, &text).await;
            if outcome.is_delivered() {
                report.delivered += 1;
            } else {
                tracing::warn!(user_id = %admin.id, outcome = ?outcome, "digest delivery failed");
                report.failed.push(admin.id);
            }
        }

        tracing::info!(
            admins = report.admins,
            delivered = report.delivered,
            failed = report.failed.len(),
            "digest cycle complete"
        );

        self.event_tx
            .send(Event::DigestCompleted {
                report: report.clone(),
            })
            .ok();

        Ok(report)
    }
}
