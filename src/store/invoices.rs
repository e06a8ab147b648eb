//! Append-only invoice ledger
//!
//! The single idempotency guard for payment reconciliation. Both drivers
//! (poll and push) may observe the same settlement; whichever lands first
//! wins the insert, the other sees a duplicate and stops. Entries are never
//! mutated or deleted.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Which payment rail an invoice was observed on. Metadata only — grant
/// semantics are identical across rails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentRail {
    Crypto,
    Stars,
}

impl PaymentRail {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRail::Crypto => "crypto",
            PaymentRail::Stars => "stars",
        }
    }
}

#[derive(Clone)]
pub struct InvoiceLedger {
    pool: SqlitePool,
}

impl InvoiceLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomic test-and-insert on the provider-issued id.
    ///
    /// Returns `true` when this call recorded the first observation and the
    /// caller owns applying the grant; `false` when the id was already in
    /// the ledger. Atomicity comes from the primary-key constraint, so the
    /// guard holds across concurrent drivers.
    pub async fn try_insert(
        &self,
        external_id: &str,
        payload: &str,
        rail: PaymentRail,
        seen_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO invoices (external_id, payload, rail, seen_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (external_id) DO NOTHING",
        )
        .bind(external_id)
        .bind(payload)
        .bind(rail.as_str())
        .bind(seen_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record invoice {}", external_id))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn contains(&self, external_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM invoices WHERE external_id = ?")
            .bind(external_id)
            .map(|row: sqlx::sqlite::SqliteRow| row.get::<i64, _>("present"))
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to check invoice {}", external_id))?;

        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_pool;

    #[tokio::test]
    async fn first_insert_wins() {
        let ledger = InvoiceLedger::new(memory_pool().await);
        let now = Utc::now();

        assert!(ledger
            .try_insert("INV-1", "premium-sub_42", PaymentRail::Crypto, now)
            .await
            .unwrap());
        assert!(ledger.contains("INV-1").await.unwrap());
    }

    #[tokio::test]
    async fn replay_is_a_noop() {
        let ledger = InvoiceLedger::new(memory_pool().await);
        let now = Utc::now();

        assert!(ledger
            .try_insert("INV-1", "premium-sub_42", PaymentRail::Crypto, now)
            .await
            .unwrap());
        // Same id from the other driver: duplicate regardless of rail
        assert!(!ledger
            .try_insert("INV-1", "premium-sub_42", PaymentRail::Stars, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn distinct_ids_both_insert() {
        let ledger = InvoiceLedger::new(memory_pool().await);
        let now = Utc::now();

        assert!(ledger
            .try_insert("INV-1", "premium-sub_1", PaymentRail::Crypto, now)
            .await
            .unwrap());
        assert!(ledger
            .try_insert("INV-2", "premium-sub_1", PaymentRail::Crypto, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn contains_is_false_for_unseen_id() {
        let ledger = InvoiceLedger::new(memory_pool().await);
        assert!(!ledger.contains("INV-404").await.unwrap());
    }
}
