//! User record store

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// One row per Telegram identity.
///
/// `is_premium` is a derived flag: the entitlement gate recomputes it from
/// `premium_expiry` on every read path and writes the corrected value back.
/// Nothing may trust the stored flag without that recompute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub is_premium: bool,
    pub premium_expiry: Option<NaiveDate>,
    pub quota_used_today: i64,
    pub last_quota_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensure the user exists; called on every inbound interaction.
    pub async fn get_or_create(
        &self,
        id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> Result<UserRecord> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO users (id, username, first_name, joined_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(username)
        .bind(first_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert user")?;

        if inserted.rows_affected() == 1 {
            debug!(user_id = id, "registered new user");
        }

        self.get(id)
            .await?
            .context("user row missing right after insert")
    }

    pub async fn get(&self, id: i64) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, username, first_name, joined_at, is_premium, \
                    premium_expiry, quota_used_today, last_quota_date \
             FROM users WHERE id = ?",
        )
        .bind(id)
        .map(from_row)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load user {}", id))?;

        Ok(row)
    }

    /// Persist the gate's lazy-reset / self-heal write as one statement.
    ///
    /// Covers the quota fields and the derived premium flag together so a
    /// concurrent premium-extension write cannot interleave with a partial
    /// update of the same row.
    pub async fn save_gate_state(&self, record: &UserRecord) -> Result<()> {
        sqlx::query(
            "UPDATE users SET quota_used_today = ?, last_quota_date = ?, is_premium = ? \
             WHERE id = ?",
        )
        .bind(record.quota_used_today)
        .bind(record.last_quota_date)
        .bind(record.is_premium)
        .bind(record.id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save gate state for user {}", record.id))?;

        Ok(())
    }

    /// Consume one quota unit. Called only after a job delivered.
    pub async fn charge(&self, id: i64, today: NaiveDate) -> Result<()> {
        sqlx::query(
            "UPDATE users SET quota_used_today = quota_used_today + 1, last_quota_date = ? \
             WHERE id = ?",
        )
        .bind(today)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to charge quota for user {}", id))?;

        Ok(())
    }

    /// Extend the entitlement and heal the derived flag in one statement.
    pub async fn extend_premium(&self, id: i64, expiry: NaiveDate) -> Result<()> {
        sqlx::query("UPDATE users SET premium_expiry = ?, is_premium = 1 WHERE id = ?")
            .bind(expiry)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to extend premium for user {}", id))?;

        Ok(())
    }

    /// Ids of every user without a live entitlement — the broadcast
    /// recipient set. Computed from `premium_expiry`, not the stored flag.
    pub async fn non_premium_ids(&self, today: NaiveDate) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id FROM users WHERE premium_expiry IS NULL OR premium_expiry < ? \
             ORDER BY id",
        )
        .bind(today)
        .map(|row: sqlx::sqlite::SqliteRow| row.get::<i64, _>("id"))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list non-premium users")?;

        Ok(rows)
    }
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        username: row.get("username"),
        first_name: row.get("first_name"),
        joined_at: row.get("joined_at"),
        is_premium: row.get("is_premium"),
        premium_expiry: row.get("premium_expiry"),
        quota_used_today: row.get("quota_used_today"),
        last_quota_date: row.get("last_quota_date"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_pool;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = UserStore::new(memory_pool().await);

        let first = store.get_or_create(42, Some("alice"), Some("Alice")).await.unwrap();
        let second = store.get_or_create(42, Some("alice2"), None).await.unwrap();

        // Second call must not reset the existing row
        assert_eq!(first.id, 42);
        assert_eq!(second.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn fresh_user_has_empty_quota_state() {
        let store = UserStore::new(memory_pool().await);

        let user = store.get_or_create(7, None, None).await.unwrap();

        assert!(!user.is_premium);
        assert!(user.premium_expiry.is_none());
        assert_eq!(user.quota_used_today, 0);
        assert!(user.last_quota_date.is_none());
    }

    #[tokio::test]
    async fn charge_increments_counter() {
        let store = UserStore::new(memory_pool().await);
        store.get_or_create(7, None, None).await.unwrap();
        let today = Utc::now().date_naive();

        store.charge(7, today).await.unwrap();
        store.charge(7, today).await.unwrap();

        let user = store.get(7).await.unwrap().unwrap();
        assert_eq!(user.quota_used_today, 2);
        assert_eq!(user.last_quota_date, Some(today));
    }

    #[tokio::test]
    async fn extend_premium_sets_expiry_and_flag() {
        let store = UserStore::new(memory_pool().await);
        store.get_or_create(7, None, None).await.unwrap();
        let expiry = Utc::now().date_naive() + chrono::Duration::days(365);

        store.extend_premium(7, expiry).await.unwrap();

        let user = store.get(7).await.unwrap().unwrap();
        assert!(user.is_premium);
        assert_eq!(user.premium_expiry, Some(expiry));
    }

    #[tokio::test]
    async fn non_premium_ids_excludes_live_entitlements_only() {
        let store = UserStore::new(memory_pool().await);
        let today = Utc::now().date_naive();

        store.get_or_create(1, None, None).await.unwrap();
        store.get_or_create(2, None, None).await.unwrap();
        store.get_or_create(3, None, None).await.unwrap();
        // 2 is entitled, 3 expired yesterday
        store.extend_premium(2, today + chrono::Duration::days(10)).await.unwrap();
        store.extend_premium(3, today - chrono::Duration::days(1)).await.unwrap();

        let ids = store.non_premium_ids(today).await.unwrap();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn expiry_on_today_counts_as_premium() {
        let store = UserStore::new(memory_pool().await);
        let today = Utc::now().date_naive();

        store.get_or_create(1, None, None).await.unwrap();
        store.extend_premium(1, today).await.unwrap();

        let ids = store.non_premium_ids(today).await.unwrap();
        assert!(ids.is_empty());
    }
}
