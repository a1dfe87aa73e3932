//! Error types for news-relay
//!
//! This module provides the error handling for the library:
//! - Domain-specific error types (database, content source, commit, etc.)
//! - Machine-readable error codes for structured logging
//! - Context information (cycle start, subscription and user ids) for commit failures
//!
//! Note that delivery failures are *not* errors: the messaging gateway reports a
//! [`DeliveryOutcome`](crate::types::DeliveryOutcome) and the dispatcher handles
//! every variant explicitly.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for news-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for news-relay
///
/// Each variant includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "gateway.bot_token")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The content source could not be queried or returned an unusable response
    #[error("content source error: {0}")]
    ContentSource(String),

    /// The messaging gateway could not be constructed or configured
    #[error("messaging gateway error: {0}")]
    Gateway(String),

    /// Batched state writes failed after deliveries were already made
    ///
    /// The messages listed here were sent but their effects were not recorded,
    /// so the next cycle may deliver them again.
    #[error(
        "commit failed for cycle started at {cycle_start}: {subscriptions} watermark(s) and \
         {users} counter(s) not recorded: {source}"
    )]
    Commit {
        /// Start instant of the cycle whose commit failed
        cycle_start: DateTime<Utc>,
        /// Number of subscriptions whose watermark advance was lost
        subscriptions: usize,
        /// Number of users whose counter increment was lost
        users: usize,
        /// Underlying store error
        #[source]
        source: Box<Error>,
    },

    /// Another cycle of the same kind is still running
    #[error("a {0} cycle is already in progress")]
    CycleInProgress(&'static str),

    /// Shutdown in progress - not accepting new cycles
    #[error("shutdown in progress: not accepting new cycles")]
    ShuttingDown,

    /// Requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl Error {
    /// Shorthand for a configuration error on a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code, stable across releases
    ///
    /// Used as the `code` field in log lines so operators can alert on
    /// specific failure classes.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(e) => match e {
                DatabaseError::ConnectionFailed(_) => "database_connection_failed",
                DatabaseError::MigrationFailed(_) => "database_migration_failed",
                DatabaseError::QueryFailed(_) => "database_query_failed",
                DatabaseError::NotFound(_) => "database_not_found",
                DatabaseError::ConstraintViolation(_) => "database_constraint_violation",
            },
            Error::Sqlx(_) => "database_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
            Error::ContentSource(_) => "fetch_failed",
            Error::Gateway(_) => "gateway_error",
            Error::Commit { .. } => "commit_failed",
            Error::CycleInProgress(_) => "cycle_in_progress",
            Error::ShuttingDown => "shutting_down",
            Error::NotFound(_) => "not_found",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether this error means the content source was unavailable
    ///
    /// A fetch failure aborts the cycle before any dispatch.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Error::ContentSource(_) | Error::Network(_))
    }
}
