//! Ledger entry log
//!
//! Append-only audit trail of balance changes. Webhook grants write their
//! entry inside the grant transaction so the exactly-once invariant is
//! checkable after the fact; debit/credit call sites record best-effort and
//! never let a failed audit write gate the primary operation.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::LedgerResult;

/// A single balance change. Positive amount = credit, negative = debit.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Reason string for a webhook grant, keyed by the processor's idempotency
/// key so the invariant checker can match events to entries.
pub fn payment_reason(external_id: &str) -> String {
    format!("payment:{}", external_id)
}

pub struct EntryLog {
    pool: PgPool,
}

impl EntryLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        account_id: Uuid,
        amount: i64,
        balance_after: i64,
        reason: &str,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (account_id, amount, balance_after, reason)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .bind(balance_after)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Transactional variant used by the webhook grant.
    pub async fn record_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        amount: i64,
        balance_after: i64,
        reason: &str,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (account_id, amount, balance_after, reason)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .bind(balance_after)
        .bind(reason)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Recent entries for an account, newest first. Serves billing-history
    /// reads.
    pub async fn recent(&self, account_id: Uuid, limit: i64) -> LedgerResult<Vec<LedgerEntry>> {
        let entries: Vec<LedgerEntry> = sqlx::query_as(
            r#"
            SELECT id, account_id, amount, balance_after, reason, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_reason_format() {
        assert_eq!(payment_reason("pay_123"), "payment:pay_123");
    }
}
