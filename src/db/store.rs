//! Relay trait implementations backed by SQLite.

use crate::Result;
use crate::relay::{StatisticsProvider, SubscriptionStore};
use crate::types::{Subscription, SubscriptionId, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::Database;

#[async_trait]
impl SubscriptionStore for Database {
    async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        Database::list_active_subscriptions(self).await
    }

    async fn advance_watermarks(
        &self,
        ids: &BTreeSet<SubscriptionId>,
        to: DateTime<Utc>,
    ) -> Result<()> {
        let advanced = Database::advance_watermarks(self, ids, to).await?;
        if advanced < ids.len() as u64 {
            tracing::debug!(
                requested = ids.len(),
                advanced,
                "some watermarks were already at or past the cycle start"
            );
        }
        Ok(())
    }

    async fn increment_counters(&self, deltas: &BTreeMap<UserId, u64>) -> Result<()> {
        Database::increment_counters(self, deltas).await
    }

    async fn deactivate_user_and_subscriptions(&self, user_id: UserId) -> Result<()> {
        Database::deactivate_user_and_subscriptions(self, user_id).await
    }

    async fn list_admins(&self) -> Result<Vec<User>> {
        Database::list_admins(self).await
    }
}

#[async_trait]
impl StatisticsProvider for Database {
    async fn compute_statistics_report(&self) -> Result<String> {
        Ok(self.statistics().await?.render())
    }
}
