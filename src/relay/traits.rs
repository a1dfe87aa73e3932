//! Traits the relay core consumes
//!
//! The fan-out engine never talks to SQLite or HTTP directly. It goes through
//! these four seams, so the crate's adapters ([`Database`](crate::db::Database),
//! [`SpaceflightNewsClient`](crate::content_source::SpaceflightNewsClient),
//! [`TelegramGateway`](crate::gateway::TelegramGateway)) can be swapped for
//! in-memory fakes in tests.

use crate::error::Result;
use crate::types::{
    ContentItem, DeliveryOutcome, Provider, Subscription, SubscriptionId, User, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Durable store of users, subscriptions and their watermarks
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every active subscription whose owner is also active
    async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>>;

    /// Move the listed watermarks forward to `to`
    ///
    /// Implementations must apply the batch atomically and must never move a
    /// watermark backwards.
    async fn advance_watermarks(
        &self,
        ids: &BTreeSet<SubscriptionId>,
        to: DateTime<Utc>,
    ) -> Result<()>;

    /// Add per-user deltas to the lifetime delivery counters, atomically
    async fn increment_counters(&self, deltas: &BTreeMap<UserId, u64>) -> Result<()>;

    /// Soft-deactivate a user and all of their subscriptions
    async fn deactivate_user_and_subscriptions(&self, user_id: UserId) -> Result<()>;

    /// Active users with the admin role
    async fn list_admins(&self) -> Result<Vec<User>>;
}

/// Aggregate statistics for the daily digest
#[async_trait]
pub trait StatisticsProvider: Send + Sync {
    /// Render the statistics report as message text
    async fn compute_statistics_report(&self) -> Result<String>;
}

/// External feed of content items
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch items from any of `providers` published strictly after `after`
    ///
    /// The returned items carry no ordering guarantee.
    async fn fetch_items(
        &self,
        providers: &BTreeSet<Provider>,
        after: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>>;
}

/// Outbound message transport
///
/// `send` never fails: every problem is folded into a [`DeliveryOutcome`].
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Deliver `text` to `user_id`
    async fn send(&self, user_id: UserId, text: &str) -> DeliveryOutcome;
}
