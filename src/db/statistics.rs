//! Aggregate statistics for the daily digest.

use crate::Result;
use crate::types::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Database, millis_to_datetime, query_failed};

/// Snapshot of users and subscriptions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Every user ever registered
    pub total_users: u64,
    /// Users above the guest tier
    pub active_users: u64,
    /// Active subscriptions across all users
    pub active_subscriptions: u64,
    /// Lifetime number of items delivered
    pub items_delivered: u64,
    /// Provider(s) with the most active subscriptions (ties included)
    pub top_providers: Vec<Provider>,
    /// Most recent watermark across all subscriptions
    pub most_recent_update: Option<DateTime<Utc>>,
}

impl Statistics {
    /// Render the plain-text report sent to admins
    pub fn render(&self) -> String {
        let top = if self.top_providers.is_empty() {
            "No active subscriptions".to_string()
        } else {
            self.top_providers
                .iter()
                .map(|p| p.api_name())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let updated = self
            .most_recent_update
            .map(|t| t.format("%d-%b-%Y %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());

        format!(
            "-- Statistic report --\n\
             Total number of registered users: {}\n\
             Total number of active users: {}\n\
             Total number of active subscriptions: {}\n\
             Total number of articles sent: {}\n\
             Top News Provider(s): {}\n\
             Most recent update: {}",
            self.total_users,
            self.active_users,
            self.active_subscriptions,
            self.items_delivered,
            top,
            updated
        )
    }
}

impl Database {
    /// Compute aggregate statistics
    pub async fn statistics(&self) -> Result<Statistics> {
        let (total_users, active_users, items_delivered): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN role <> 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(items_received), 0)
            FROM users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(query_failed("Failed to count users"))?;

        let active_subscriptions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE active = 1")
                .fetch_one(&self.pool)
                .await
                .map_err(query_failed("Failed to count subscriptions"))?;

        let provider_counts: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT provider, COUNT(*) AS n
            FROM subscriptions
            WHERE active = 1
            GROUP BY provider
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("Failed to count providers"))?;

        let most_recent: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(last_delivered_at) FROM subscriptions")
                .fetch_one(&self.pool)
                .await
                .map_err(query_failed("Failed to query most recent update"))?;

        let max_count = provider_counts.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let mut top_providers: Vec<Provider> = provider_counts
            .iter()
            .filter(|(_, n)| *n == max_count && max_count > 0)
            .filter_map(|(key, _)| key.parse().ok())
            .collect();
        top_providers.sort();

        Ok(Statistics {
            total_users: total_users.max(0) as u64,
            active_users: active_users.max(0) as u64,
            active_subscriptions: active_subscriptions.max(0) as u64,
            items_delivered: items_delivered.max(0) as u64,
            top_providers,
            most_recent_update: most_recent.map(millis_to_datetime),
        })
    }
}
