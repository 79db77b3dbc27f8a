//! Payment webhook intake
//!
//! The transport boundary is where error classes become response policy:
//! duplicates, ignored event types, and malformed payloads are all
//! acknowledged with 200 so the processor stops redelivering things
//! redelivery cannot fix. Failures that redelivery CAN fix (missing
//! account, unknown product, store outage) return non-2xx — the processor's
//! own retry mechanism is the recovery path, and the idempotency gate makes
//! re-invocation safe.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use tally_ledger::{verify_signature, WebhookOutcome};

use crate::error::ApiError;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-tally-signature";

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Some(secret) = &state.config.payment_webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !verify_signature(secret, body.as_bytes(), signature) {
            tracing::warn!("Webhook signature verification failed");
            return ApiError::Unauthorized.into_response();
        }
    }

    match state.ledger.webhooks.handle_event(&body).await {
        Ok(outcome) => {
            match &outcome {
                WebhookOutcome::Processed {
                    account_id,
                    credits_granted,
                    plan_activated,
                } => {
                    tracing::info!(
                        account_id = %account_id,
                        credits_granted,
                        plan_activated = ?plan_activated,
                        "Webhook processed"
                    );
                }
                WebhookOutcome::Duplicate { external_id } => {
                    // Not an error: at-least-once delivery doing its thing
                    tracing::info!(external_id = %external_id, "Duplicate payment event acknowledged");
                }
                WebhookOutcome::Ignored { event } => {
                    tracing::debug!(event = %event, "Unhandled webhook event acknowledged");
                }
                WebhookOutcome::InvalidPayload { detail } => {
                    // Deliberately still a 200: a malformed payload cannot be
                    // fixed by redelivery, and a non-2xx here would trigger a
                    // retry storm from the processor. The error is logged for
                    // operators instead.
                    tracing::error!(detail = %detail, "Invalid webhook payload acknowledged");
                }
            }
            Json(json!({ "success": true })).into_response()
        }
        // Non-2xx: processor redelivers; safe under the idempotency gate
        Err(e) => ApiError::from(e).into_response(),
    }
}
