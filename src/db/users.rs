//! User registration, roles, deactivation and delivery counters.

use crate::Result;
use crate::types::{User, UserActivation, UserId, UserRole};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::{Database, UserRow, query_failed};

impl Database {
    /// Register a user on first contact, or reactivate a returning one
    ///
    /// New users start with the `User` role. A returning guest is promoted back to
    /// `User`; a returning admin keeps the admin role.
    pub async fn activate_user(&self, id: UserId, now: DateTime<Utc>) -> Result<UserActivation> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, role, active, items_received, created_at)
            VALUES (?, ?, 1, 0, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(UserRole::User.access_level())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(query_failed("Failed to insert user"))?;

        if result.rows_affected() > 0 {
            tracing::info!(user_id = %id, "registered new user");
            return Ok(UserActivation::Created);
        }

        sqlx::query(
            r#"
            UPDATE users
            SET active = 1, role = MAX(role, ?)
            WHERE id = ?
            "#,
        )
        .bind(UserRole::User.access_level())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_failed("Failed to reactivate user"))?;

        tracing::debug!(user_id = %id, "reactivated returning user");
        Ok(UserActivation::Returning)
    }

    /// Get a user by ID
    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, role, active, items_received, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("Failed to get user"))?;

        Ok(row.map(User::from))
    }

    /// Change a user's access tier
    ///
    /// Returns `false` if the user does not exist.
    pub async fn set_user_role(&self, id: UserId, role: UserRole) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.access_level())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_failed("Failed to update user role"))?;

        Ok(result.rows_affected() > 0)
    }

    /// List active admins
    pub async fn list_admins(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, role, active, items_received, created_at
            FROM users
            WHERE role = ? AND active = 1
            ORDER BY id ASC
            "#,
        )
        .bind(UserRole::Admin.access_level())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("Failed to list admins"))?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Deactivate a user and every one of their subscriptions
    ///
    /// The user is lowered to the `Guest` tier; nothing is deleted. Both updates
    /// run in one transaction.
    pub async fn deactivate_user_and_subscriptions(&self, id: UserId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("Failed to begin transaction"))?;

        sqlx::query("UPDATE users SET active = 0, role = ? WHERE id = ?")
            .bind(UserRole::Guest.access_level())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("Failed to deactivate user"))?;

        let subscriptions = sqlx::query("UPDATE subscriptions SET active = 0 WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("Failed to deactivate subscriptions"))?;

        tx.commit()
            .await
            .map_err(query_failed("Failed to commit deactivation"))?;

        tracing::info!(
            user_id = %id,
            subscriptions = subscriptions.rows_affected(),
            "deactivated user and subscriptions"
        );
        Ok(())
    }

    /// Add per-user deltas to the lifetime delivery counters
    ///
    /// All increments are applied in a single transaction. Unknown user ids are
    /// ignored.
    pub async fn increment_counters(&self, deltas: &BTreeMap<UserId, u64>) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("Failed to begin transaction"))?;

        for (user_id, delta) in deltas {
            sqlx::query("UPDATE users SET items_received = items_received + ? WHERE id = ?")
                .bind(i64::try_from(*delta).unwrap_or(i64::MAX))
                .bind(*user_id)
                .execute(&mut *tx)
                .await
                .map_err(query_failed("Failed to increment delivery counter"))?;
        }

        tx.commit()
            .await
            .map_err(query_failed("Failed to commit counter increments"))?;

        Ok(())
    }
}
