//! Service-token authentication middleware
//!
//! The debit, read, and admin routes are server-to-server surfaces consumed
//! by the feature layer and operator tooling; they require a static bearer
//! token compared in constant time. The webhook intake authenticates with a
//! payload signature instead and bypasses this middleware.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

/// Constant-time token comparison. Length differences short-circuit inside
/// `ct_eq` without leaking position information.
pub fn token_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn extract_bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn require_service_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = match &state.config.service_token {
        Some(token) => token,
        None => {
            // No token configured: fail closed rather than exposing the
            // internal surface
            return Err(ApiError::Unauthorized);
        }
    };

    let provided = extract_bearer_token(&request).ok_or(ApiError::Unauthorized)?;

    if !token_matches(provided, expected) {
        tracing::warn!(path = %request.uri().path(), "Rejected request with invalid service token");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("tok_abc", "tok_abc"));
        assert!(!token_matches("tok_abc", "tok_abd"));
        assert!(!token_matches("tok_abc", "tok_abcd"));
        assert!(!token_matches("", "tok_abc"));
    }
}
