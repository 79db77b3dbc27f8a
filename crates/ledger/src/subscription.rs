//! Subscription state
//!
//! Owns each account's active plan and expiry timestamp. Plan expiry is
//! lazy: there is no background scheduler. Whichever reader first observes
//! `plan_expires_at < now` writes the idempotent correction back to the
//! store; racing correctors converge on the same terminal state, so losing
//! the race is not an error. Callers never observe an expired paid plan.

use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use tally_shared::PlanId;

use crate::error::{LedgerError, LedgerResult};

/// The entitlement-governing plan state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanStatus {
    pub plan: PlanId,
    #[serde(with = "time::serde::rfc3339::option")]
    pub plan_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub plan_expires_at: Option<OffsetDateTime>,
}

impl PlanStatus {
    pub fn free() -> Self {
        Self {
            plan: PlanId::Free,
            plan_started_at: None,
            plan_expires_at: None,
        }
    }
}

/// The lazy-expiry decision, factored out of the store round-trips so the
/// state machine is unit-testable.
///
/// Returns the plan status callers should observe and whether the stored row
/// needs the idempotent free-plan correction written back.
pub fn evaluate_plan(stored: PlanStatus, now: OffsetDateTime) -> (PlanStatus, bool) {
    if stored.plan == PlanId::Free {
        return (stored, false);
    }
    match stored.plan_expires_at {
        Some(expires_at) if expires_at < now => (PlanStatus::free(), true),
        // Unlimited (NULL expiry) paid plans exist only via admin override
        _ => (stored, false),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StoredPlanRow {
    plan: String,
    plan_started_at: Option<OffsetDateTime>,
    plan_expires_at: Option<OffsetDateTime>,
}

/// Service owning plan transitions.
pub struct SubscriptionState {
    pool: PgPool,
}

impl SubscriptionState {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Activate a plan.
    ///
    /// Always overwrites any prior expiry — a new purchase restarts the
    /// clock rather than stacking onto the old window, keeping "one clear
    /// expiry per account" auditable. `duration_days = None` clears the
    /// expiry (the administrative unlimited override).
    pub async fn activate(
        &self,
        account_id: Uuid,
        plan_id: PlanId,
        duration_days: Option<i64>,
    ) -> LedgerResult<PlanStatus> {
        let now = OffsetDateTime::now_utc();
        let expires_at = duration_days.map(|d| now + Duration::days(d));

        let rows = sqlx::query(
            r#"
            UPDATE accounts
            SET plan = $2,
                plan_started_at = $3,
                plan_expires_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(plan_id.as_str())
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        tracing::info!(
            account_id = %account_id,
            plan = %plan_id,
            expires_at = ?expires_at,
            "Activated plan"
        );

        Ok(PlanStatus {
            plan: plan_id,
            plan_started_at: Some(now),
            plan_expires_at: expires_at,
        })
    }

    /// Activation inside the webhook grant transaction, so the plan change
    /// commits or rolls back together with the credit grant.
    pub async fn activate_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        plan_id: PlanId,
        duration_days: Option<i64>,
    ) -> LedgerResult<PlanStatus> {
        let now = OffsetDateTime::now_utc();
        let expires_at = duration_days.map(|d| now + Duration::days(d));

        let rows = sqlx::query(
            r#"
            UPDATE accounts
            SET plan = $2,
                plan_started_at = $3,
                plan_expires_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(plan_id.as_str())
        .bind(now)
        .bind(expires_at)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        Ok(PlanStatus {
            plan: plan_id,
            plan_started_at: Some(now),
            plan_expires_at: expires_at,
        })
    }

    /// The lazy-expiry read path.
    ///
    /// Reads the stored plan; if it has expired, writes the free-plan
    /// correction and returns the corrected values instead of the stale
    /// ones. The correction is guarded so concurrent correctors converge:
    /// re-applying it is harmless, and we deliberately ignore how many rows
    /// the write touched.
    pub async fn effective_plan(&self, account_id: Uuid) -> LedgerResult<PlanStatus> {
        let row: Option<StoredPlanRow> = sqlx::query_as(
            "SELECT plan, plan_started_at, plan_expires_at FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(LedgerError::AccountNotFound(account_id))?;

        let plan = PlanId::parse(&row.plan).ok_or_else(|| LedgerError::CorruptPlan {
            account_id,
            plan: row.plan.clone(),
        })?;

        let stored = PlanStatus {
            plan,
            plan_started_at: row.plan_started_at,
            plan_expires_at: row.plan_expires_at,
        };

        let (effective, needs_correction) = evaluate_plan(stored, OffsetDateTime::now_utc());

        if needs_correction {
            sqlx::query(
                r#"
                UPDATE accounts
                SET plan = 'free',
                    plan_started_at = NULL,
                    plan_expires_at = NULL,
                    updated_at = NOW()
                WHERE id = $1 AND plan <> 'free' AND plan_expires_at < NOW()
                "#,
            )
            .bind(account_id)
            .execute(&self.pool)
            .await?;

            tracing::info!(
                account_id = %account_id,
                expired_plan = %stored.plan,
                "Lazy plan expiry: corrected to free"
            );
        }

        Ok(effective)
    }

    /// Manual transition to free, used by administrative tooling. Same
    /// terminal write as the lazy-expiry correction.
    pub async fn downgrade(&self, account_id: Uuid) -> LedgerResult<PlanStatus> {
        let rows = sqlx::query(
            r#"
            UPDATE accounts
            SET plan = 'free',
                plan_started_at = NULL,
                plan_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::AccountNotFound(account_id));
        }

        tracing::info!(account_id = %account_id, "Downgraded account to free plan");
        Ok(PlanStatus::free())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paid_status(expires_in_days: i64, now: OffsetDateTime) -> PlanStatus {
        PlanStatus {
            plan: PlanId::Basic,
            plan_started_at: Some(now - Duration::days(1)),
            plan_expires_at: Some(now + Duration::days(expires_in_days)),
        }
    }

    #[test]
    fn test_active_paid_plan_passes_through() {
        let now = OffsetDateTime::now_utc();
        let stored = paid_status(10, now);
        let (effective, correct) = evaluate_plan(stored, now);
        assert_eq!(effective, stored);
        assert!(!correct);
    }

    #[test]
    fn test_expired_plan_corrects_to_free() {
        // Activated for 30 days, read at day 31
        let t0 = OffsetDateTime::now_utc();
        let stored = PlanStatus {
            plan: PlanId::Pro,
            plan_started_at: Some(t0),
            plan_expires_at: Some(t0 + Duration::days(30)),
        };
        let (effective, correct) = evaluate_plan(stored, t0 + Duration::days(31));
        assert_eq!(effective, PlanStatus::free());
        assert!(correct);
    }

    #[test]
    fn test_correction_is_idempotent() {
        // Re-evaluating the already-corrected state asks for no further write
        let now = OffsetDateTime::now_utc();
        let (effective, correct) = evaluate_plan(PlanStatus::free(), now);
        assert_eq!(effective, PlanStatus::free());
        assert!(!correct);
    }

    #[test]
    fn test_unlimited_paid_plan_never_expires() {
        let now = OffsetDateTime::now_utc();
        let stored = PlanStatus {
            plan: PlanId::Pro,
            plan_started_at: Some(now - Duration::days(400)),
            plan_expires_at: None,
        };
        let (effective, correct) = evaluate_plan(stored, now);
        assert_eq!(effective, stored);
        assert!(!correct);
    }

    #[test]
    fn test_expiry_exactly_now_is_still_active() {
        // Strict `<` comparison: the boundary instant has not yet passed
        let now = OffsetDateTime::now_utc();
        let stored = PlanStatus {
            plan: PlanId::Basic,
            plan_started_at: Some(now - Duration::days(30)),
            plan_expires_at: Some(now),
        };
        let (_, correct) = evaluate_plan(stored, now);
        assert!(!correct);
    }
}
