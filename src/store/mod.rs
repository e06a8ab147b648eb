//! Durable state: user records and the invoice ledger
//!
//! SQLite via sqlx. The schema is created at startup; there is no separate
//! migration step for a single-file bot database.

pub mod invoices;
pub mod users;

pub use invoices::{InvoiceLedger, PaymentRail};
pub use users::{UserRecord, UserStore};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Open the database and create the schema if missing.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .with_context(|| format!("Failed to open database: {}", url))?;

    create_schema(&pool).await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id               INTEGER PRIMARY KEY,
            username         TEXT,
            first_name       TEXT,
            joined_at        TEXT NOT NULL,
            is_premium       INTEGER NOT NULL DEFAULT 0,
            premium_expiry   TEXT,
            quota_used_today INTEGER NOT NULL DEFAULT 0,
            last_quota_date  TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            external_id TEXT PRIMARY KEY,
            payload     TEXT NOT NULL,
            rail        TEXT NOT NULL,
            seen_at     TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create invoices table")?;

    Ok(())
}

/// In-memory pool for tests. A single connection keeps every query on the
/// same `:memory:` database.
#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory database");
    create_schema(&pool).await.expect("create schema");
    pool
}
