// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tally Ledger Core
//!
//! The credit/subscription ledger: prepaid balances gated behind atomic
//! debits, time-boxed plan tiers with lazy expiry, and idempotent credit
//! grants driven by an external payment processor's webhook.
//!
//! ## Guarantees
//!
//! - **Exactly-once credit application** under at-least-once webhook
//!   delivery (unique-constraint idempotency gate + claimed grant
//!   transaction)
//! - **Atomic balance decrements** under concurrent usage (single
//!   conditional UPDATE, never read-then-write)
//! - **Correct plan degradation** over time with no background scheduler
//!   (lazy, idempotent expiry correction on the read path)
//!
//! All cross-request safety lives in the store; the crate holds no mutable
//! in-process state and is safe behind any number of concurrent instances.
//! No HTTP types leak into this crate.

pub mod accounts;
pub mod credits;
pub mod entries;
pub mod error;
pub mod invariants;
pub mod plans;
pub mod subscription;
pub mod tier;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Accounts
pub use accounts::{Account, AccountService, ProvisionOutcome, STARTER_CREDIT_GRANT};

// Credits
pub use credits::{CreditLedger, DebitOutcome};

// Entries
pub use entries::{payment_reason, EntryLog, LedgerEntry};

// Error
pub use error::{LedgerError, LedgerResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Plans
pub use plans::{CreditPack, PlanDefinition, PlanRegistry, Product};

// Subscription
pub use subscription::{evaluate_plan, PlanStatus, SubscriptionState};

// Tier
pub use tier::SpendTier;

// Webhooks
pub use webhooks::{
    parse_event, sign_payload, verify_signature, ParsedEvent, PaymentNotice, WebhookOutcome,
    WebhookProcessor,
};

use sqlx::PgPool;
use std::sync::Arc;

/// Main ledger service that combines all ledger functionality
pub struct LedgerService {
    pub registry: Arc<PlanRegistry>,
    pub accounts: AccountService,
    pub credits: CreditLedger,
    pub subscriptions: SubscriptionState,
    pub entries: EntryLog,
    pub webhooks: WebhookProcessor,
    pub invariants: InvariantChecker,
}

impl LedgerService {
    /// Create a ledger service over a shared pool with the builtin catalog.
    pub fn new(pool: PgPool) -> Self {
        let registry = Arc::new(PlanRegistry::builtin());
        Self {
            accounts: AccountService::new(pool.clone()),
            credits: CreditLedger::new(pool.clone()),
            subscriptions: SubscriptionState::new(pool.clone()),
            entries: EntryLog::new(pool.clone()),
            webhooks: WebhookProcessor::new(pool.clone(), registry.clone()),
            invariants: InvariantChecker::new(pool, registry.clone()),
            registry,
        }
    }
}
