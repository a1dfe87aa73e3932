//! Subscription CRUD and watermark advances.

use crate::error::DatabaseError;
use crate::types::{Provider, SubscribeOutcome, Subscription, SubscriptionId, UserId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::BTreeSet;

use super::{Database, SubscriptionRow, query_failed};

/// Upper bound on bound parameters per statement (SQLite's historical limit is 999)
const WATERMARK_CHUNK: usize = 500;

impl Database {
    /// List every active subscription whose owner is also active
    pub async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT s.id, s.user_id, s.provider, s.active, s.last_delivered_at
            FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE s.active = 1 AND u.active = 1
            ORDER BY s.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("Failed to list active subscriptions"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    /// List a user's active subscriptions
    pub async fn list_user_subscriptions(&self, user_id: UserId) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, user_id, provider, active, last_delivered_at
            FROM subscriptions
            WHERE user_id = ? AND active = 1
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("Failed to list user subscriptions"))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    /// Get subscription by ID (active or not)
    pub async fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, user_id, provider, active, last_delivered_at
            FROM subscriptions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("Failed to get subscription"))?;

        row.map(Subscription::try_from).transpose()
    }

    /// Subscribe a user to a provider
    ///
    /// A new subscription starts with its watermark at `now`, so only items published
    /// afterwards are delivered. An inactive subscription for the same pair is
    /// reactivated instead of duplicated; its watermark moves forward to `now` so the
    /// backlog accumulated while inactive is not replayed.
    pub async fn subscribe(
        &self,
        user_id: UserId,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> Result<SubscribeOutcome> {
        if self.get_user(user_id).await?.is_none() {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "user {}",
                user_id
            ))));
        }

        let existing: Option<(i64, i32)> = sqlx::query_as(
            "SELECT id, active FROM subscriptions WHERE user_id = ? AND provider = ?",
        )
        .bind(user_id)
        .bind(provider.key())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("Failed to look up subscription"))?;

        let now_ms = now.timestamp_millis();

        match existing {
            Some((id, active)) if active != 0 => {
                Ok(SubscribeOutcome::AlreadyActive(SubscriptionId(id)))
            }
            Some((id, _)) => {
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET active = 1, last_delivered_at = MAX(last_delivered_at, ?)
                    WHERE id = ?
                    "#,
                )
                .bind(now_ms)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(query_failed("Failed to reactivate subscription"))?;

                tracing::info!(user_id = %user_id, subscription_id = id, %provider, "subscription reactivated");
                Ok(SubscribeOutcome::Reactivated(SubscriptionId(id)))
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO subscriptions (user_id, provider, active, last_delivered_at, created_at)
                    VALUES (?, ?, 1, ?, ?)
                    "#,
                )
                .bind(user_id)
                .bind(provider.key())
                .bind(now_ms)
                .bind(now.timestamp())
                .execute(&self.pool)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                        Error::Database(DatabaseError::ConstraintViolation(format!(
                            "user {} is already subscribed to {}",
                            user_id, provider
                        )))
                    }
                    other => query_failed("Failed to insert subscription")(other),
                })?;

                let id = SubscriptionId(result.last_insert_rowid());
                tracing::info!(user_id = %user_id, subscription_id = %id, %provider, "subscription added");
                Ok(SubscribeOutcome::Added(id))
            }
        }
    }

    /// Deactivate a user's subscription to a provider
    ///
    /// Returns `false` if there was no active subscription for the pair.
    pub async fn unsubscribe(&self, user_id: UserId, provider: Provider) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET active = 0
            WHERE user_id = ? AND provider = ? AND active = 1
            "#,
        )
        .bind(user_id)
        .bind(provider.key())
        .execute(&self.pool)
        .await
        .map_err(query_failed("Failed to deactivate subscription"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Move the watermark of every listed subscription forward to `to`
    ///
    /// Watermarks never move backwards: a subscription already at or past `to` is
    /// left untouched. All updates run in one transaction. Returns the number of
    /// subscriptions that actually moved.
    pub async fn advance_watermarks(
        &self,
        ids: &BTreeSet<SubscriptionId>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let to_ms = to.timestamp_millis();
        let ids: Vec<SubscriptionId> = ids.iter().copied().collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("Failed to begin transaction"))?;

        let mut advanced = 0;
        for chunk in ids.chunks(WATERMARK_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE subscriptions SET last_delivered_at = ");
            builder.push_bind(to_ms);
            builder.push(" WHERE last_delivered_at < ");
            builder.push_bind(to_ms);
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(query_failed("Failed to advance watermarks"))?;
            advanced += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(query_failed("Failed to commit watermark advance"))?;

        Ok(advanced)
    }
}
