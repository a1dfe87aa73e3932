//! Core types for news-relay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Defines an `i64` newtype identifier that round-trips through SQLite.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Create a new identifier
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

id_type!(
    /// Recipient identifier (the messaging platform's chat id)
    UserId
);

id_type!(
    /// Unique identifier for a subscription
    SubscriptionId
);

/// Access tier of a user
///
/// Tiers are ordered: `Guest < User < Admin`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Unregistered or deactivated user
    Guest,
    /// Regular subscriber
    User,
    /// Privileged user, receives the daily digest
    Admin,
}

impl UserRole {
    /// Numeric access level (0 = guest, 1 = user, 2 = admin)
    pub fn access_level(self) -> i32 {
        match self {
            UserRole::Guest => 0,
            UserRole::User => 1,
            UserRole::Admin => 2,
        }
    }

    /// Convert a stored access level back into a role
    ///
    /// Unknown levels map to `Guest`, the least privileged tier.
    pub fn from_i32(level: i32) -> Self {
        match level {
            1 => UserRole::User,
            2 => UserRole::Admin,
            _ => UserRole::Guest,
        }
    }
}

/// News site a subscription follows
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// Ars Technica
    #[serde(rename = "ARSTECHNICA")]
    Arstechnica,
    /// European Spaceflight
    #[serde(rename = "EUROPEAN_SPACEFLIGHT")]
    EuropeanSpaceflight,
    /// NASA
    #[serde(rename = "NASA")]
    Nasa,
    /// NASASpaceflight
    #[serde(rename = "NASASPACEFLIGHT")]
    NasaSpaceflight,
    /// SpaceNews
    #[serde(rename = "SPACENEWS")]
    SpaceNews,
    /// SpacePolicyOnline.com
    #[serde(rename = "SPACEPOLICYONLINE")]
    SpacePolicyOnline,
    /// Space Scout
    #[serde(rename = "SPACE_SCOUT")]
    SpaceScout,
}

impl Provider {
    /// Every supported provider, in display order
    pub const ALL: [Provider; 7] = [
        Provider::Arstechnica,
        Provider::EuropeanSpaceflight,
        Provider::Nasa,
        Provider::NasaSpaceflight,
        Provider::SpaceNews,
        Provider::SpacePolicyOnline,
        Provider::SpaceScout,
    ];

    /// Stable key used in storage and user commands
    pub fn key(self) -> &'static str {
        match self {
            Provider::Arstechnica => "ARSTECHNICA",
            Provider::EuropeanSpaceflight => "EUROPEAN_SPACEFLIGHT",
            Provider::Nasa => "NASA",
            Provider::NasaSpaceflight => "NASASPACEFLIGHT",
            Provider::SpaceNews => "SPACENEWS",
            Provider::SpacePolicyOnline => "SPACEPOLICYONLINE",
            Provider::SpaceScout => "SPACE_SCOUT",
        }
    }

    /// Site name as reported by the content source
    pub fn api_name(self) -> &'static str {
        match self {
            Provider::Arstechnica => "Arstechnica",
            Provider::EuropeanSpaceflight => "European Spaceflight",
            Provider::Nasa => "NASA",
            Provider::NasaSpaceflight => "NASASpaceflight",
            Provider::SpaceNews => "SpaceNews",
            Provider::SpacePolicyOnline => "SpacePolicyOnline.com",
            Provider::SpaceScout => "Space Scout",
        }
    }

    /// Look up a provider by the site name the content source reports
    pub fn from_api_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.api_name() == name)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Provider {
    type Err = crate::Error;

    /// Accepts the storage key in any case (`nasa`, `SPACE_SCOUT`) or the exact API name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.key().eq_ignore_ascii_case(trimmed) || p.api_name() == trimmed)
            .ok_or_else(|| crate::Error::NotFound(format!("provider '{}'", trimmed)))
    }
}

/// A registered recipient
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Recipient identifier
    pub id: UserId,
    /// Access tier
    pub role: UserRole,
    /// Whether the user currently receives updates
    pub active: bool,
    /// Lifetime number of items delivered to this user
    pub items_received: u64,
    /// When the user first made contact
    pub created_at: DateTime<Utc>,
}

/// A user's subscription to one provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription identifier
    pub id: SubscriptionId,
    /// Owning user
    pub user_id: UserId,
    /// Followed provider
    pub provider: Provider,
    /// Whether the subscription is active
    pub active: bool,
    /// Publication instant of the most recent item delivered under this subscription
    ///
    /// Only items published strictly after this instant are delivered.
    pub watermark: DateTime<Utc>,
}

/// A freshly fetched content item
///
/// Items live for one cycle only and are never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentItem {
    /// Provider that published the item
    pub provider: Provider,
    /// Publication instant
    pub published_at: DateTime<Utc>,
    /// Rendered message body
    pub body: String,
}

/// One message to deliver to one recipient
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryTask {
    /// Target recipient
    pub user_id: UserId,
    /// Message text
    pub text: String,
    /// Subscription the message originates from (absent for digest messages)
    pub subscription_id: Option<SubscriptionId>,
}

/// Result of a single delivery attempt
///
/// Exactly three outcomes exist; the dispatcher matches on all of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The message was accepted by the messaging platform
    Delivered,
    /// The recipient blocked the bot or no longer exists (permanent)
    RecipientUnreachable(String),
    /// Network problem, rate limit or unknown failure (retried next cycle)
    TransientError(String),
}

impl DeliveryOutcome {
    /// Whether the message reached the recipient
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// How a content cycle ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// No active subscriptions, nothing was fetched
    NoSubscriptions,
    /// The content source returned nothing new, nothing was dispatched
    NoNewItems,
    /// Items were fetched, matched and dispatched
    Dispatched,
}

/// Summary of one content cycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Instant captured before fetching; successful watermarks advance to it
    pub cycle_start: DateTime<Utc>,
    /// How the cycle ended
    pub status: CycleStatus,
    /// Number of active subscriptions considered
    pub subscriptions: usize,
    /// Number of items returned by the content source
    pub items_fetched: usize,
    /// Number of delivery tasks produced by the matcher
    pub tasks: usize,
    /// Number of messages delivered
    pub delivered: u64,
    /// Number of tasks skipped because their recipient had already failed this cycle
    pub skipped: u64,
    /// Recipients reported unreachable (and deactivated) this cycle
    pub unreachable_users: Vec<UserId>,
    /// Recipients that hit a transient error this cycle
    pub transient_failures: Vec<UserId>,
    /// Number of subscriptions whose watermark was advanced
    pub watermarks_advanced: usize,
}

impl CycleReport {
    /// Report for a cycle that ended before dispatch
    pub fn idle(
        cycle_start: DateTime<Utc>,
        status: CycleStatus,
        subscriptions: usize,
        items_fetched: usize,
    ) -> Self {
        Self {
            cycle_start,
            status,
            subscriptions,
            items_fetched,
            tasks: 0,
            delivered: 0,
            skipped: 0,
            unreachable_users: Vec::new(),
            transient_failures: Vec::new(),
            watermarks_advanced: 0,
        }
    }
}

/// Summary of one digest cycle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestReport {
    /// Number of admins found
    pub admins: usize,
    /// Number of admins the report reached
    pub delivered: usize,
    /// Admins the report did not reach
    pub failed: Vec<UserId>,
}

/// Events emitted by the relay
///
/// Consumers subscribe via [`NewsRelay::subscribe`](crate::NewsRelay::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A content cycle finished (including no-op cycles)
    CycleCompleted {
        /// Cycle summary
        report: CycleReport,
    },

    /// A content cycle aborted (fetch or commit failure)
    CycleFailed {
        /// Error message
        error: String,
    },

    /// A recipient was found unreachable and deactivated
    RecipientDeactivated {
        /// Deactivated recipient
        user_id: UserId,
        /// Reason reported by the gateway
        reason: String,
    },

    /// A digest cycle finished
    DigestCompleted {
        /// Digest summary
        report: DigestReport,
    },
}

/// Result of registering a user on first contact
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserActivation {
    /// A new user was created
    Created,
    /// An existing user was (re)activated
    Returning,
}

/// Result of subscribing a user to a provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new subscription was created
    Added(SubscriptionId),
    /// An inactive subscription was reactivated instead of duplicated
    Reactivated(SubscriptionId),
    /// The subscription was already active
    AlreadyActive(SubscriptionId),
}

impl SubscribeOutcome {
    /// Identifier of the affected subscription
    pub fn id(self) -> SubscriptionId {
        match self {
            SubscribeOutcome::Added(id)
            | SubscribeOutcome::Reactivated(id)
            | SubscribeOutcome::AlreadyActive(id) => id,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_ordered_by_access_level() {
        assert!(UserRole::Guest < UserRole::User);
        assert!(UserRole::User < UserRole::Admin);
        for role in [UserRole::Guest, UserRole::User, UserRole::Admin] {
            assert_eq!(UserRole::from_i32(role.access_level()), role);
        }
        assert_eq!(UserRole::from_i32(7), UserRole::Guest);
    }

    #[test]
    fn provider_parses_key_case_insensitively_and_api_name_exactly() {
        assert_eq!("nasa".parse::<Provider>().unwrap(), Provider::Nasa);
        assert_eq!(
            "space_scout".parse::<Provider>().unwrap(),
            Provider::SpaceScout
        );
        assert_eq!(
            "SpacePolicyOnline.com".parse::<Provider>().unwrap(),
            Provider::SpacePolicyOnline
        );
        assert!("bbc".parse::<Provider>().is_err());
    }

    #[test]
    fn provider_api_names_are_unique_and_reversible() {
        for provider in Provider::ALL {
            assert_eq!(Provider::from_api_name(provider.api_name()), Some(provider));
        }
        assert_eq!(Provider::from_api_name("nasa"), None);
    }

    #[test]
    fn provider_serializes_as_storage_key() {
        let json = serde_json::to_string(&Provider::EuropeanSpaceflight).unwrap();
        assert_eq!(json, "\"EUROPEAN_SPACEFLIGHT\"");
        let back: Provider = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Provider::EuropeanSpaceflight);
    }

    #[test]
    fn events_are_tagged_by_type() {
        let event = Event::RecipientDeactivated {
            user_id: UserId(42),
            reason: "Forbidden: bot was blocked by the user".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recipient_deactivated");
        assert_eq!(json["user_id"], 42);
    }
}
