//! Ledger error types
//!
//! Expected business outcomes (insufficient balance, duplicate payment
//! event) are NOT errors — they are modeled as typed outcome enums on the
//! operations that produce them. `LedgerError` covers the cases that abort
//! an operation: store failures, validation failures, missing accounts on
//! paths that require one.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Store round-trip failed. The caller must treat an in-flight write as
    /// an unknown outcome and re-check state before retrying.
    #[error("database error: {0}")]
    Database(String),

    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    /// Product id not present in the plan registry. A hard validation error
    /// at the registry boundary; there is no fallback to free.
    #[error("unknown product: {0}")]
    UnknownProduct(String),

    #[error("invalid amount: {0} (must be positive)")]
    InvalidAmount(i64),

    /// Stored plan value outside the closed plan set. Indicates a writer
    /// bypassed the registry boundary.
    #[error("account {account_id} has unrecognized stored plan '{plan}'")]
    CorruptPlan { account_id: Uuid, plan: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}
