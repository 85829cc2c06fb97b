//! Database transaction utilities
//!
//! Multi-statement writes (set-default, batch inserts, permanent deletion) go through
//! `TransactionGuard` so begin/commit failures carry context and timing is logged.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::time::Instant;

/// A database transaction wrapper.
///
/// Dropping the guard without calling `commit` rolls the transaction back when the
/// connection returns to the pool.
///
/// # Example
///
/// ```ignore
/// use vault_db::db::transaction::TransactionGuard;
///
/// async fn example(pool: &sqlx::PgPool) -> anyhow::Result<()> {
///     let mut tx = TransactionGuard::begin(pool, "example").await?;
///     sqlx::query("UPDATE ...").execute(tx.conn()).await?;
///     tx.commit().await?;
///     Ok(())
/// }
/// ```
pub struct TransactionGuard {
    transaction: Transaction<'static, Postgres>,
    label: &'static str,
    started: Instant,
}

impl TransactionGuard {
    /// Begin a new database transaction
    pub async fn begin(pool: &PgPool, label: &'static str) -> Result<Self> {
        let transaction = pool
            .begin()
            .await
            .with_context(|| format!("Failed to begin database transaction ({})", label))?;

        Ok(Self {
            transaction,
            label,
            started: Instant::now(),
        })
    }

    /// Connection to run statements on inside the transaction.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.transaction
    }

    /// Commit the transaction
    pub async fn commit(self) -> Result<()> {
        let label = self.label;
        let started = self.started;
        self.transaction
            .commit()
            .await
            .with_context(|| format!("Failed to commit database transaction ({})", label))?;

        tracing::debug!(
            transaction = label,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Transaction committed"
        );
        Ok(())
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> Result<()> {
        let label = self.label;
        self.transaction
            .rollback()
            .await
            .with_context(|| format!("Failed to rollback database transaction ({})", label))?;

        tracing::debug!(transaction = label, "Transaction rolled back");
        Ok(())
    }
}
