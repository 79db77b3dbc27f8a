//! Route table

pub mod admin;
pub mod credits;
pub mod webhooks;

use axum::extract::State;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::auth::require_service_token;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Server-to-server surfaces: feature-layer debits/reads plus operator
    // tooling. All behind the service token.
    let internal = Router::new()
        .route("/v1/credits/debit", post(credits::debit))
        .route("/v1/accounts", post(credits::provision))
        .route("/v1/accounts/{id}/billing", get(credits::billing))
        .route("/v1/accounts/{id}/history", get(credits::history))
        .route("/admin/accounts/{id}/plan", post(admin::change_plan))
        .route(
            "/admin/accounts/{id}/usage/reset",
            post(admin::reset_daily_usage),
        )
        .route("/admin/accounts/{id}/credits", post(admin::grant_credits))
        .route("/admin/invariants", get(admin::run_invariants))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_service_token,
        ));

    Router::new()
        .route("/health", get(health))
        // Signature-authenticated, not token-authenticated
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .merge(internal)
        .with_state(state)
}

/// Liveness plus a store ping.
async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .map_err(|e| crate::error::ApiError::StoreUnavailable(e.to_string()))?;

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}
