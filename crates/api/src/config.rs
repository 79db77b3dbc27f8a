//! Configuration
//!
//! Loaded once at startup from the environment. Required values error out
//! immediately; optional ones degrade with a logged warning so a
//! misconfigured deployment is visible, not silent.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string (required)
    pub database_url: String,
    /// Listen address, e.g. "0.0.0.0:8080"
    pub bind_address: String,
    /// Bearer token for the internal/admin routes. When unset those routes
    /// reject every request.
    pub service_token: Option<String>,
    /// HMAC secret for webhook signature verification. When unset the
    /// intake skips verification.
    pub payment_webhook_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let service_token = std::env::var("SERVICE_TOKEN").ok().filter(|t| !t.is_empty());
        if service_token.is_none() {
            tracing::warn!(
                "SERVICE_TOKEN not set - internal and admin routes will reject all requests"
            );
        }

        let payment_webhook_secret = std::env::var("PAYMENT_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        if payment_webhook_secret.is_none() {
            tracing::warn!(
                "PAYMENT_WEBHOOK_SECRET not set - webhook signature verification disabled"
            );
        }

        Ok(Self {
            database_url,
            bind_address,
            service_token,
            payment_webhook_secret,
        })
    }
}
