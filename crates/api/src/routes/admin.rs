//! Administrative routes
//!
//! Operator tooling: manual plan changes, credit adjustments, usage resets,
//! and on-demand invariant sweeps. All behind the service token like the
//! rest of the internal surface.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use tally_ledger::InvariantChecker;
use tally_shared::PlanId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: String,
    /// Overrides the catalog duration. `None` with a paid plan falls back to
    /// the catalog; explicit overrides exist for support comps.
    #[serde(default)]
    pub duration_days: Option<i64>,
}

/// POST /admin/accounts/{id}/plan
pub async fn change_plan(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let plan_id = PlanId::parse(&req.plan_id)
        .ok_or_else(|| ApiError::Validation(format!("unknown plan '{}'", req.plan_id)))?;

    let status = if plan_id == PlanId::Free {
        state.ledger.subscriptions.downgrade(account_id).await?
    } else {
        let duration = req.duration_days.or_else(|| {
            state
                .ledger
                .registry
                .plan(plan_id)
                .and_then(|p| p.duration_days)
        });
        state
            .ledger
            .subscriptions
            .activate(account_id, plan_id, duration)
            .await?
    };

    tracing::info!(
        account_id = %account_id,
        plan = %status.plan,
        "Administrative plan change"
    );

    Ok(Json(json!({
        "success": true,
        "plan_status": status,
    })))
}

#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /admin/accounts/{id}/credits — manual credit adjustment.
pub async fn grant_credits(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
    Json(req): Json<GrantCreditsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let reason = req.reason.as_deref().unwrap_or("admin:grant");

    let balance = state
        .ledger
        .credits
        .credit(account_id, req.amount, reason)
        .await?;

    Ok(Json(json!({
        "success": true,
        "balance": balance,
    })))
}

/// POST /admin/accounts/{id}/usage/reset
pub async fn reset_daily_usage(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.ledger.credits.reset_daily_usage(account_id).await?;

    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct InvariantParams {
    /// Run a single named check instead of the full sweep.
    pub check: Option<String>,
}

/// GET /admin/invariants
pub async fn run_invariants(
    State(state): State<AppState>,
    Query(params): Query<InvariantParams>,
) -> ApiResult<Json<serde_json::Value>> {
    match params.check {
        Some(name) => {
            if !InvariantChecker::available_checks().contains(&name.as_str()) {
                return Err(ApiError::Validation(format!(
                    "unknown check '{}'; available: {}",
                    name,
                    InvariantChecker::available_checks().join(", ")
                )));
            }
            let violations = state.ledger.invariants.run_check(&name).await?;
            Ok(Json(json!({
                "check": name,
                "healthy": violations.is_empty(),
                "violations": violations,
            })))
        }
        None => {
            let summary = state.ledger.invariants.run_all_checks().await?;
            Ok(Json(json!(summary)))
        }
    }
}
