//! Database layer for news-relay
//!
//! Handles SQLite persistence for users and subscriptions. This is the durable
//! side of the relay: the fan-out engine only reads active subscriptions from it
//! and writes back batched watermark advances and counter increments.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`users`] - User registration, roles, deactivation, delivery counters
//! - [`subscriptions`] - Subscription CRUD and watermark advances
//! - [`statistics`] - Aggregate statistics for the daily digest
//! - [`store`] - Relay trait implementations backed by this database

use crate::error::{DatabaseError, Error};
use crate::types::{Provider, Subscription, SubscriptionId, User, UserId, UserRole};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod statistics;
mod store;
mod subscriptions;
mod users;

pub use statistics::Statistics;

/// User record from database
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    /// Recipient identifier
    pub id: i64,
    /// Access level (0 = guest, 1 = user, 2 = admin)
    pub role: i32,
    /// Whether the user is active (0 = no, 1 = yes)
    pub active: i32,
    /// Lifetime number of items delivered
    pub items_received: i64,
    /// Unix timestamp (seconds) of first contact
    pub created_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            role: UserRole::from_i32(row.role),
            active: row.active != 0,
            items_received: row.items_received.max(0) as u64,
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or_else(Utc::now),
        }
    }
}

/// Subscription record from database
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    /// Unique database ID
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    /// Provider storage key (e.g. "NASA")
    pub provider: String,
    /// Whether the subscription is active (0 = no, 1 = yes)
    pub active: i32,
    /// Watermark as Unix timestamp in milliseconds
    pub last_delivered_at: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = Error;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let provider: Provider = row.provider.parse().map_err(|_| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "subscription {} has unknown provider '{}'",
                row.id, row.provider
            )))
        })?;

        Ok(Subscription {
            id: SubscriptionId(row.id),
            user_id: UserId(row.user_id),
            provider,
            active: row.active != 0,
            watermark: millis_to_datetime(row.last_delivered_at),
        })
    }
}

/// Convert stored milliseconds back into an instant
pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Wrap a sqlx error into a query failure with context
pub(crate) fn query_failed(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, e)))
}

/// Database handle for news-relay
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
