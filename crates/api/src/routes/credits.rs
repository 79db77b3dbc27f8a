//! Credit and account routes
//!
//! The debit endpoint reports its two expected outcomes (insufficient
//! balance, unknown account) as 200-with-body results rather than HTTP
//! errors: callers branch on them as part of the normal contract, and the
//! status code is reserved for requests that failed outright.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use tally_ledger::{DebitOutcome, SpendTier};

use crate::error::ApiResult;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    pub account_id: Uuid,
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /v1/credits/debit
pub async fn debit(
    State(state): State<AppState>,
    Json(req): Json<DebitRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let reason = req.reason.as_deref().unwrap_or("usage");

    let outcome = state
        .ledger
        .credits
        .debit(req.account_id, req.amount, reason)
        .await?;

    let body = match outcome {
        DebitOutcome::Applied { new_balance } => json!({
            "success": true,
            "balance": new_balance,
        }),
        DebitOutcome::InsufficientBalance { balance } => json!({
            "success": false,
            "error": "INSUFFICIENT_BALANCE",
            "balance": balance,
        }),
        DebitOutcome::AccountNotFound => json!({
            "success": false,
            "error": "ACCOUNT_NOT_FOUND",
        }),
    };

    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub external_ref: String,
}

/// POST /v1/accounts — idempotent provision-or-fetch.
pub async fn provision(
    State(state): State<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state.ledger.accounts.provision(&req.external_ref).await?;

    Ok(Json(json!({
        "success": true,
        "created": outcome.created(),
        "account": outcome.account(),
    })))
}

/// GET /v1/accounts/{id}/billing
///
/// The consolidated billing view. Resolves the effective plan first so the
/// lazy-expiry correction lands before the account row is read back.
pub async fn billing(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let plan_status = state.ledger.subscriptions.effective_plan(account_id).await?;
    let account = state.ledger.accounts.get(account_id).await?;

    let rfc3339 = |t: Option<OffsetDateTime>| t.and_then(|t| t.format(&Rfc3339).ok());

    Ok(Json(json!({
        "account_id": account.id,
        "balance": account.credit_balance,
        "plan": plan_status.plan.as_str(),
        "plan_started_at": rfc3339(plan_status.plan_started_at),
        "plan_expires_at": rfc3339(plan_status.plan_expires_at),
        "spend_tier": SpendTier::classify(account.lifetime_spend),
        "lifetime_spend": account.lifetime_spend,
        "daily_usage": account.daily_usage,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

/// GET /v1/accounts/{id}/history — recent ledger entries, newest first.
pub async fn history(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<serde_json::Value>> {
    // 404 for unknown accounts instead of an empty history
    let account = state.ledger.accounts.get(account_id).await?;

    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let entries = state.ledger.entries.recent(account_id, limit).await?;

    Ok(Json(json!({
        "account_id": account.id,
        "entries": entries,
    })))
}
