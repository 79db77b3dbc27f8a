//! Ledger invariants
//!
//! Runnable consistency checks for the credit/subscription ledger. These can
//! be run after any mutation or webhook replay to verify the system is in a
//! valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write
//! 4. **Complete**: Covers the ledger's critical consistency requirements

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::accounts::STARTER_CREDIT_GRANT;
use crate::error::LedgerResult;
use crate::plans::PlanRegistry;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Account(s) affected
    pub account_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - credits may have been minted or lost
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct NegativeBalanceRow {
    account_id: Uuid,
    credit_balance: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingExpiryRow {
    account_id: Uuid,
    plan: String,
}

#[derive(Debug, sqlx::FromRow)]
struct UngrantedEventRow {
    account_id: Uuid,
    external_id: String,
    credits_granted: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DoubleGrantRow {
    reason: String,
    account_ids: Vec<Uuid>,
    grant_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct StuckPendingRow {
    account_id: Uuid,
    external_id: String,
    created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct BalanceDriftRow {
    account_id: Uuid,
    credit_balance: i64,
    entry_sum: i64,
}

/// Service for running ledger invariant checks
pub struct InvariantChecker {
    pool: PgPool,
    registry: Arc<PlanRegistry>,
}

impl InvariantChecker {
    pub fn new(pool: PgPool, registry: Arc<PlanRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> LedgerResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_negative_balance().await?);
        violations.extend(self.check_paid_plan_has_expiry().await?);
        violations.extend(self.check_succeeded_event_has_grant().await?);
        violations.extend(self.check_single_grant_per_event().await?);
        violations.extend(self.check_stuck_pending_events().await?);
        violations.extend(self.check_balance_reconciles_with_entries().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: No negative balances
    ///
    /// The debit precondition plus the CHECK constraint make this
    /// unreachable; a hit means a writer bypassed the ledger contract.
    async fn check_negative_balance(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeBalanceRow> = sqlx::query_as(
            r#"
            SELECT id as account_id, credit_balance
            FROM accounts
            WHERE credit_balance < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "negative_balance".to_string(),
                account_ids: vec![row.account_id],
                description: format!(
                    "Account has negative credit balance ({})",
                    row.credit_balance
                ),
                context: serde_json::json!({
                    "credit_balance": row.credit_balance,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Paid plans are time-boxed
    ///
    /// A paid plan whose catalog duration is finite must have an expiry.
    /// Administrative unlimited overrides surface here by design so the
    /// documented exception stays visible.
    async fn check_paid_plan_has_expiry(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let finite_plans: Vec<String> = [
            tally_shared::PlanId::Basic,
            tally_shared::PlanId::Pro,
        ]
        .iter()
        .filter(|p| {
            self.registry
                .plan(**p)
                .is_some_and(|def| def.duration_days.is_some())
        })
        .map(|p| p.as_str().to_string())
        .collect();

        let rows: Vec<MissingExpiryRow> = sqlx::query_as(
            r#"
            SELECT id as account_id, plan
            FROM accounts
            WHERE plan = ANY($1)
              AND plan_expires_at IS NULL
            "#,
        )
        .bind(&finite_plans)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_plan_has_expiry".to_string(),
                account_ids: vec![row.account_id],
                description: format!(
                    "Account is on paid plan '{}' with no expiry (admin unlimited override, or a missed activation write)",
                    row.plan
                ),
                context: serde_json::json!({
                    "plan": row.plan,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: Every succeeded payment event has its grant entry
    ///
    /// A `succeeded` row without a matching `payment:<external_id>` ledger
    /// entry means the claim committed without the credit — the grant
    /// transaction is supposed to make that impossible.
    async fn check_succeeded_event_has_grant(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<UngrantedEventRow> = sqlx::query_as(
            r#"
            SELECT pe.account_id, pe.external_id, pe.credits_granted
            FROM payment_events pe
            WHERE pe.status = 'succeeded'
              AND NOT EXISTS (
                  SELECT 1 FROM ledger_entries le
                  WHERE le.reason = 'payment:' || pe.external_id
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "succeeded_event_has_grant".to_string(),
                account_ids: vec![row.account_id],
                description: format!(
                    "Payment event '{}' is succeeded but has no grant ledger entry",
                    row.external_id
                ),
                context: serde_json::json!({
                    "external_id": row.external_id,
                    "credits_granted": row.credits_granted,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: At most one grant per payment event
    ///
    /// Two ledger entries for the same `payment:<external_id>` reason mean
    /// the idempotency gate was bypassed and credits were minted twice.
    async fn check_single_grant_per_event(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<DoubleGrantRow> = sqlx::query_as(
            r#"
            SELECT reason,
                   array_agg(DISTINCT account_id) as account_ids,
                   COUNT(*) as grant_count
            FROM ledger_entries
            WHERE reason LIKE 'payment:%'
            GROUP BY reason
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_grant_per_event".to_string(),
                account_ids: row.account_ids,
                description: format!(
                    "Payment '{}' was granted {} times (expected 1)",
                    row.reason, row.grant_count
                ),
                context: serde_json::json!({
                    "reason": row.reason,
                    "grant_count": row.grant_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: No payment events stuck pending
    ///
    /// A `pending` row older than 30 minutes is a delivery that died
    /// mid-grant and has not been redelivered yet. The processor's retry
    /// mechanism normally clears these; persistent ones need a manual
    /// replay.
    async fn check_stuck_pending_events(&self) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<StuckPendingRow> = sqlx::query_as(
            r#"
            SELECT account_id, external_id, created_at
            FROM payment_events
            WHERE status = 'pending'
              AND created_at < NOW() - INTERVAL '30 minutes'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "stuck_pending_events".to_string(),
                account_ids: vec![row.account_id],
                description: format!(
                    "Payment event '{}' has been pending since {} (awaiting redelivery)",
                    row.external_id, row.created_at
                ),
                context: serde_json::json!({
                    "external_id": row.external_id,
                    "created_at": row.created_at.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 6: Balance reconciles with the entry log
    ///
    /// balance should equal starter grant + sum of entries. Advisory only:
    /// debit entries are best-effort, so drift here usually means dropped
    /// audit writes rather than a balance bug.
    async fn check_balance_reconciles_with_entries(
        &self,
    ) -> LedgerResult<Vec<InvariantViolation>> {
        let rows: Vec<BalanceDriftRow> = sqlx::query_as(
            r#"
            SELECT a.id as account_id,
                   a.credit_balance,
                   COALESCE(SUM(le.amount), 0)::BIGINT as entry_sum
            FROM accounts a
            LEFT JOIN ledger_entries le ON le.account_id = a.id
            GROUP BY a.id, a.credit_balance
            HAVING a.credit_balance <> $1 + COALESCE(SUM(le.amount), 0)
            "#,
        )
        .bind(STARTER_CREDIT_GRANT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "balance_reconciles_with_entries".to_string(),
                account_ids: vec![row.account_id],
                description: format!(
                    "Balance {} drifts from starter grant + entry sum ({} + {})",
                    row.credit_balance, STARTER_CREDIT_GRANT, row.entry_sum
                ),
                context: serde_json::json!({
                    "credit_balance": row.credit_balance,
                    "entry_sum": row.entry_sum,
                    "starter_grant": STARTER_CREDIT_GRANT,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> LedgerResult<Vec<InvariantViolation>> {
        match name {
            "negative_balance" => self.check_negative_balance().await,
            "paid_plan_has_expiry" => self.check_paid_plan_has_expiry().await,
            "succeeded_event_has_grant" => self.check_succeeded_event_has_grant().await,
            "single_grant_per_event" => self.check_single_grant_per_event().await,
            "stuck_pending_events" => self.check_stuck_pending_events().await,
            "balance_reconciles_with_entries" => {
                self.check_balance_reconciles_with_entries().await
            }
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "negative_balance",
            "paid_plan_has_expiry",
            "succeeded_event_has_grant",
            "single_grant_per_event",
            "stuck_pending_events",
            "balance_reconciles_with_entries",
        ]
    }
}
