//! HTTP error types
//!
//! Maps ledger outcomes and failures onto transport status codes. Expected
//! business outcomes (insufficient balance, duplicate event) never pass
//! through here — they are 200-with-body contract outputs, handled by the
//! route handlers. `ApiError` covers the cases where the request itself
//! fails.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use tally_ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    /// Store failure. 5xx so webhook callers redeliver (safe under the
    /// idempotency gate) and debit callers know to retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound => "ACCOUNT_NOT_FOUND",
            ApiError::Validation(_) => "VALIDATION_FAILED",
            ApiError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Database(msg) => ApiError::StoreUnavailable(msg),
            LedgerError::AccountNotFound(_) => ApiError::NotFound,
            LedgerError::UnknownProduct(id) => {
                ApiError::Validation(format!("unknown product '{}'", id))
            }
            LedgerError::InvalidAmount(a) => {
                ApiError::Validation(format!("invalid amount: {} (must be positive)", a))
            }
            // A corrupt stored plan means a writer bypassed the registry
            // boundary; surface as a store-level failure
            LedgerError::CorruptPlan { .. } => ApiError::StoreUnavailable(e.to_string()),
        }
    }
}
