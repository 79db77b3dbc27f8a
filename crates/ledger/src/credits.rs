//! Credit ledger
//!
//! Owns each account's spendable balance. The debit is a single atomic
//! conditional UPDATE — never a read-then-write pair, because under
//! concurrent requests that reintroduces the exact race this component
//! exists to prevent. The store serializes contending debits; exactly one
//! wins when only one unit of balance remains contested.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::entries::EntryLog;
use crate::error::{LedgerError, LedgerResult};

/// Outcome of a debit attempt. `InsufficientBalance` and `AccountNotFound`
/// are expected, recoverable outcomes reported to the caller — never panics
/// or control-flow-unwinding errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Applied { new_balance: i64 },
    InsufficientBalance { balance: i64 },
    AccountNotFound,
}

/// Classify the result of the conditional debit UPDATE.
///
/// `updated` is the RETURNING value (None = zero rows affected, no side
/// effect occurred); `reread` is the follow-up balance read used to tell
/// "account missing" from "balance too low".
pub fn classify_debit(updated: Option<i64>, reread: Option<i64>) -> DebitOutcome {
    match (updated, reread) {
        (Some(new_balance), _) => DebitOutcome::Applied { new_balance },
        (None, Some(balance)) => DebitOutcome::InsufficientBalance { balance },
        (None, None) => DebitOutcome::AccountNotFound,
    }
}

/// Precondition shared by debit and credit: amounts are strictly positive.
pub fn validate_amount(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

/// Service owning balance mutations.
pub struct CreditLedger {
    pool: PgPool,
    entries: EntryLog,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        let entries = EntryLog::new(pool.clone());
        Self { pool, entries }
    }

    /// Atomically debit an account.
    ///
    /// One round-trip: decrement balance, bump lifetime spend and the daily
    /// usage counter, guarded by `credit_balance >= amount`. Zero rows
    /// affected means no side effect occurred; a re-read distinguishes a
    /// missing account from an insufficient balance.
    pub async fn debit(
        &self,
        account_id: Uuid,
        amount: i64,
        reason: &str,
    ) -> LedgerResult<DebitOutcome> {
        validate_amount(amount)?;

        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET credit_balance = credit_balance - $2,
                lifetime_spend = lifetime_spend + $2,
                daily_usage = daily_usage + 1,
                updated_at = NOW()
            WHERE id = $1 AND credit_balance >= $2
            RETURNING credit_balance
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        let reread = match updated {
            Some(_) => None,
            None => {
                sqlx::query_scalar("SELECT credit_balance FROM accounts WHERE id = $1")
                    .bind(account_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        let outcome = classify_debit(updated, reread);

        match outcome {
            DebitOutcome::Applied { new_balance } => {
                // Audit entry never gates the debit itself
                if let Err(e) = self
                    .entries
                    .record(account_id, -amount, new_balance, reason)
                    .await
                {
                    tracing::warn!(
                        account_id = %account_id,
                        error = %e,
                        "Failed to record debit ledger entry"
                    );
                }
                tracing::debug!(
                    account_id = %account_id,
                    amount,
                    new_balance,
                    reason = %reason,
                    "Debited account"
                );
            }
            DebitOutcome::InsufficientBalance { balance } => {
                tracing::debug!(
                    account_id = %account_id,
                    amount,
                    balance,
                    "Debit declined: insufficient balance"
                );
            }
            DebitOutcome::AccountNotFound => {
                tracing::warn!(account_id = %account_id, "Debit against unknown account");
            }
        }

        Ok(outcome)
    }

    /// Unconditional atomic increment. Used only by the webhook processor
    /// and administrative overrides. Returns the new balance.
    pub async fn credit(&self, account_id: Uuid, amount: i64, reason: &str) -> LedgerResult<i64> {
        validate_amount(amount)?;

        let new_balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET credit_balance = credit_balance + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING credit_balance
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        let new_balance = new_balance.ok_or(LedgerError::AccountNotFound(account_id))?;

        if let Err(e) = self
            .entries
            .record(account_id, amount, new_balance, reason)
            .await
        {
            tracing::warn!(
                account_id = %account_id,
                error = %e,
                "Failed to record credit ledger entry"
            );
        }

        tracing::info!(
            account_id = %account_id,
            amount,
            new_balance,
            reason = %reason,
            "Credited account"
        );

        Ok(new_balance)
    }

    /// Credit inside an existing transaction. The webhook grant uses this so
    /// the increment commits or rolls back together with the idempotency
    /// claim; the caller records the audit entry in the same transaction.
    pub async fn credit_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        amount: i64,
    ) -> LedgerResult<i64> {
        validate_amount(amount)?;

        let new_balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET credit_balance = credit_balance + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING credit_balance
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&mut **tx)
        .await?;

        new_balance.ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Plain read, no side effects.
    pub async fn get_balance(&self, account_id: Uuid) -> LedgerResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT credit_balance FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?;

        balance.ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Reset the daily usage counter. Administrative support path.
    pub async fn reset_daily_usage(&self, account_id: Uuid) -> LedgerResult<()> {
        let rows = sqlx::query(
            "UPDATE accounts SET daily_usage = 0, updated_at = NOW() WHERE id = $1",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        tracing::info!(account_id = %account_id, "Reset daily usage counter");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_applied() {
        assert_eq!(
            classify_debit(Some(95), None),
            DebitOutcome::Applied { new_balance: 95 }
        );
    }

    #[test]
    fn test_classify_insufficient() {
        // Zero rows affected, account exists with a balance below the amount
        assert_eq!(
            classify_debit(None, Some(3)),
            DebitOutcome::InsufficientBalance { balance: 3 }
        );
    }

    #[test]
    fn test_classify_account_not_found() {
        assert_eq!(classify_debit(None, None), DebitOutcome::AccountNotFound);
    }

    #[test]
    fn test_debit_amount_must_be_positive() {
        assert!(matches!(
            validate_amount(0),
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            validate_amount(-5),
            Err(LedgerError::InvalidAmount(-5))
        ));
        assert!(validate_amount(1).is_ok());
    }
}
