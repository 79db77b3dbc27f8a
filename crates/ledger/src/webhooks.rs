//! Payment webhook processor
//!
//! Idempotent ingestion of payment-succeeded events from the external
//! processor. This is the only path that grants credits and activates paid
//! plans. Delivery is at-least-once, so the design assumes duplicates:
//!
//! 1. The idempotency gate is an `INSERT .. ON CONFLICT DO NOTHING` keyed by
//!    the processor-supplied `external_id` — the unique constraint, not any
//!    in-process lock, serializes concurrent deliveries.
//! 2. The grant itself runs in one transaction that first claims the
//!    `pending` row (`status = 'pending' -> 'succeeded'`). A crash anywhere
//!    in the grant rolls the claim back, so the row stays `pending` and the
//!    next redelivery retries the grant instead of silently no-opping.
//!    "Already fully processed" and "partially processed" are distinct.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use tally_shared::PlanId;

use crate::credits::CreditLedger;
use crate::entries::{payment_reason, EntryLog};
use crate::error::{LedgerError, LedgerResult};
use crate::plans::{PlanRegistry, Product};
use crate::subscription::SubscriptionState;

type HmacSha256 = Hmac<Sha256>;

/// Wire format of the processor's notification envelope.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    event: Option<String>,
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: Option<WebhookObject>,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: Option<String>,
    #[allow(dead_code)]
    status: Option<String>,
    paid: Option<bool>,
    account_id: Option<Uuid>,
    product_id: Option<String>,
}

/// A shape-validated payment-succeeded notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotice {
    pub external_id: String,
    pub account_id: Uuid,
    pub product_id: String,
}

/// Result of parsing and filtering a raw payload.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedEvent {
    PaymentSucceeded(PaymentNotice),
    /// Well-formed but not an event this processor acts on.
    Ignored { event: String },
    /// Malformed. Retrying cannot fix it.
    Invalid { detail: String },
}

/// Parse and shape-validate a raw webhook body. Pure, so the filter logic is
/// testable without a store.
pub fn parse_event(raw_payload: &str) -> ParsedEvent {
    let envelope: WebhookEnvelope = match serde_json::from_str(raw_payload) {
        Ok(e) => e,
        Err(e) => {
            return ParsedEvent::Invalid {
                detail: format!("not valid JSON: {}", e),
            }
        }
    };

    if envelope.kind.as_deref() != Some("notification") {
        return ParsedEvent::Invalid {
            detail: "missing or unexpected 'type' (expected \"notification\")".to_string(),
        };
    }

    let event = match envelope.event {
        Some(event) => event,
        None => {
            return ParsedEvent::Invalid {
                detail: "missing 'event'".to_string(),
            }
        }
    };

    if event != "payment.succeeded" {
        return ParsedEvent::Ignored { event };
    }

    let object = match envelope.data.and_then(|d| d.object) {
        Some(object) => object,
        None => {
            return ParsedEvent::Invalid {
                detail: "missing 'data.object'".to_string(),
            }
        }
    };

    let external_id = match object.id {
        Some(id) if !id.is_empty() => id,
        _ => {
            return ParsedEvent::Invalid {
                detail: "missing 'data.object.id'".to_string(),
            }
        }
    };

    // Unpaid "succeeded" notifications exist in some processors' test
    // flows; acknowledge without granting.
    if object.paid != Some(true) {
        return ParsedEvent::Ignored {
            event: "payment.succeeded (unpaid)".to_string(),
        };
    }

    let account_id = match object.account_id {
        Some(id) => id,
        None => {
            return ParsedEvent::Invalid {
                detail: "missing 'data.object.account_id'".to_string(),
            }
        }
    };

    let product_id = match object.product_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            return ParsedEvent::Invalid {
                detail: "missing 'data.object.product_id'".to_string(),
            }
        }
    };

    ParsedEvent::PaymentSucceeded(PaymentNotice {
        external_id,
        account_id,
        product_id,
    })
}

/// Interpretation of the idempotency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// We inserted the row, or found a pending row from a delivery that died
    /// mid-grant — proceed to (re)try the grant.
    Proceed,
    /// The event was already fully processed — acknowledge without touching
    /// the ledger or subscription state.
    Duplicate,
}

/// Decide what to do after the gate insert. `inserted` is whether our
/// INSERT .. ON CONFLICT DO NOTHING returned a row; `existing_status` is the
/// stored status fetched on conflict.
pub fn interpret_gate(inserted: bool, existing_status: Option<&str>) -> GateDecision {
    if inserted {
        return GateDecision::Proceed;
    }
    match existing_status {
        Some("succeeded") => GateDecision::Duplicate,
        // 'pending' (or 'failed'): a prior delivery never completed the
        // grant — retry it. The claim UPDATE inside the grant transaction
        // keeps concurrent retries exactly-once.
        _ => GateDecision::Proceed,
    }
}

/// Outcome of handling one delivery.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed {
        account_id: Uuid,
        credits_granted: i64,
        plan_activated: Option<PlanId>,
    },
    Duplicate {
        external_id: String,
    },
    Ignored {
        event: String,
    },
    InvalidPayload {
        detail: String,
    },
}

pub struct WebhookProcessor {
    pool: PgPool,
    registry: Arc<PlanRegistry>,
}

impl WebhookProcessor {
    pub fn new(pool: PgPool, registry: Arc<PlanRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Handle one raw delivery.
    ///
    /// Returns `Ok` for every outcome the transport should acknowledge
    /// (processed, duplicate, ignored, invalid payload) and `Err` only when
    /// the operation should be redelivered: unknown product, missing
    /// account, store failure. Redelivery is safe because it re-enters the
    /// idempotency gate.
    pub async fn handle_event(&self, raw_payload: &str) -> LedgerResult<WebhookOutcome> {
        let notice = match parse_event(raw_payload) {
            ParsedEvent::PaymentSucceeded(notice) => notice,
            ParsedEvent::Ignored { event } => {
                tracing::debug!(event = %event, "Ignoring webhook event type");
                return Ok(WebhookOutcome::Ignored { event });
            }
            ParsedEvent::Invalid { detail } => {
                tracing::error!(detail = %detail, "Invalid webhook payload");
                return Ok(WebhookOutcome::InvalidPayload { detail });
            }
        };

        // Resolve product and account before opening the idempotency gate:
        // a typo'd product id in a real payment must fail loudly, and the
        // processor's redelivery succeeds once the catalog is fixed.
        let (credits_granted, plan) = match self.registry.resolve(&notice.product_id)? {
            Product::Plan(plan) => (plan.credit_grant, Some(plan.clone())),
            Product::Pack(pack) => (pack.credit_grant, None),
        };

        let account_exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM accounts WHERE id = $1")
                .bind(notice.account_id)
                .fetch_optional(&self.pool)
                .await?;
        if account_exists.is_none() {
            return Err(LedgerError::AccountNotFound(notice.account_id));
        }

        // Idempotency gate: the unique constraint on external_id serializes
        // concurrent deliveries of the same event.
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO payment_events
                (external_id, account_id, product_id, credits_granted, status)
            VALUES ($1, $2, $3, $4, 'pending')
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&notice.external_id)
        .bind(notice.account_id)
        .bind(&notice.product_id)
        .bind(credits_granted)
        .fetch_optional(&self.pool)
        .await?;

        let existing_status: Option<String> = if inserted.is_none() {
            sqlx::query_scalar("SELECT status FROM payment_events WHERE external_id = $1")
                .bind(&notice.external_id)
                .fetch_optional(&self.pool)
                .await?
        } else {
            None
        };

        match interpret_gate(inserted.is_some(), existing_status.as_deref()) {
            GateDecision::Duplicate => {
                tracing::info!(
                    external_id = %notice.external_id,
                    "Duplicate payment event - already processed, acknowledging"
                );
                Ok(WebhookOutcome::Duplicate {
                    external_id: notice.external_id,
                })
            }
            GateDecision::Proceed => {
                if inserted.is_none() {
                    tracing::warn!(
                        external_id = %notice.external_id,
                        status = ?existing_status,
                        "Redelivery of partially processed payment event - retrying grant"
                    );
                }
                self.apply_grant(&notice, credits_granted, plan.as_ref().map(|p| (p.plan_id, p.duration_days)))
                    .await
            }
        }
    }

    /// The grant transaction.
    ///
    /// Claims the pending row first; exactly one of any number of racing
    /// workers sees `rows_affected = 1`. Credit, audit entry, and plan
    /// activation then commit atomically with the claim — any failure rolls
    /// everything back and the row stays `pending` for the next redelivery.
    async fn apply_grant(
        &self,
        notice: &PaymentNotice,
        credits_granted: i64,
        plan: Option<(PlanId, Option<i64>)>,
    ) -> LedgerResult<WebhookOutcome> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE payment_events
            SET status = 'succeeded', processed_at = NOW()
            WHERE external_id = $1 AND status = 'pending'
            "#,
        )
        .bind(&notice.external_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            // Another worker won the claim race; dropping tx rolls back
            tracing::info!(
                external_id = %notice.external_id,
                "Lost grant claim race - acknowledging as duplicate"
            );
            return Ok(WebhookOutcome::Duplicate {
                external_id: notice.external_id.clone(),
            });
        }

        let new_balance =
            CreditLedger::credit_in_tx(&mut tx, notice.account_id, credits_granted).await?;

        EntryLog::record_in_tx(
            &mut tx,
            notice.account_id,
            credits_granted,
            new_balance,
            &payment_reason(&notice.external_id),
        )
        .await?;

        let plan_activated = match plan {
            Some((plan_id, duration_days)) => {
                SubscriptionState::activate_in_tx(&mut tx, notice.account_id, plan_id, duration_days)
                    .await?;
                Some(plan_id)
            }
            None => None,
        };

        tx.commit().await?;

        tracing::info!(
            external_id = %notice.external_id,
            account_id = %notice.account_id,
            credits_granted,
            plan_activated = ?plan_activated,
            new_balance,
            "Processed payment event"
        );

        Ok(WebhookOutcome::Processed {
            account_id: notice.account_id,
            credits_granted,
            plan_activated,
        })
    }
}

/// Verify the intake signature: hex(HMAC-SHA256(secret, raw_body)).
/// Constant-time via the MAC's own verification.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let expected = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature a caller should send. Used by tests and by
/// operator tooling that replays captured payloads.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}
