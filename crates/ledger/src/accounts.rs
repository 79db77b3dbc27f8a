//! Account provisioning and reads
//!
//! Accounts are provisioned on first authentication, keyed by the auth
//! layer's subject id (`external_ref`). Provisioning is idempotent: the
//! starter credit grant rides in the INSERT itself, so two racing first
//! logins can never apply it twice — the loser of the unique-constraint race
//! simply fetches the existing row.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Credits every new account starts with. Reconciliation treats this as the
/// baseline, so no ledger entry is written for it.
pub const STARTER_CREDIT_GRANT: i64 = 100;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub external_ref: String,
    pub credit_balance: i64,
    pub lifetime_spend: i64,
    pub daily_usage: i64,
    /// Raw stored plan. Entitlement readers go through
    /// `SubscriptionState::effective_plan`, which validates and applies the
    /// lazy-expiry correction; this field is informational.
    pub plan: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub plan_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub plan_expires_at: Option<OffsetDateTime>,
    pub disabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug)]
pub enum ProvisionOutcome {
    Created(Account),
    Existing(Account),
}

impl ProvisionOutcome {
    pub fn account(&self) -> &Account {
        match self {
            ProvisionOutcome::Created(a) | ProvisionOutcome::Existing(a) => a,
        }
    }

    pub fn created(&self) -> bool {
        matches!(self, ProvisionOutcome::Created(_))
    }
}

const ACCOUNT_COLUMNS: &str = "id, external_ref, credit_balance, lifetime_spend, daily_usage, \
     plan, plan_started_at, plan_expires_at, disabled, created_at";

pub struct AccountService {
    pool: PgPool,
}

impl AccountService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Provision-or-fetch by external reference.
    pub async fn provision(&self, external_ref: &str) -> LedgerResult<ProvisionOutcome> {
        let inserted: Option<Account> = sqlx::query_as(&format!(
            r#"
            INSERT INTO accounts (external_ref, credit_balance)
            VALUES ($1, $2)
            ON CONFLICT (external_ref) DO NOTHING
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(external_ref)
        .bind(STARTER_CREDIT_GRANT)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(account) = inserted {
            tracing::info!(
                account_id = %account.id,
                external_ref = %external_ref,
                starter_grant = STARTER_CREDIT_GRANT,
                "Provisioned account"
            );
            return Ok(ProvisionOutcome::Created(account));
        }

        // Lost the insert race or the account already existed
        let existing = self.get_by_ref(external_ref).await?;
        Ok(ProvisionOutcome::Existing(existing))
    }

    pub async fn get(&self, account_id: Uuid) -> LedgerResult<Account> {
        let account: Option<Account> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or(LedgerError::AccountNotFound(account_id))
    }

    pub async fn get_by_ref(&self, external_ref: &str) -> LedgerResult<Account> {
        let account: Option<Account> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE external_ref = $1"
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or_else(|| {
            LedgerError::Database(format!("account with external_ref '{external_ref}' not found"))
        })
    }

    /// Cheap presence probe for callers that do not need the full row.
    pub async fn exists(&self, account_id: Uuid) -> LedgerResult<bool> {
        let found: Option<Uuid> = sqlx::query_scalar("SELECT id FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(found.is_some())
    }
}
