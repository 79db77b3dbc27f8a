//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use tally_ledger::LedgerService;

use crate::config::Config;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub ledger: Arc<LedgerService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let ledger = Arc::new(LedgerService::new(pool.clone()));
        tracing::info!("Ledger service initialized");

        if config.service_token.is_some() {
            tracing::info!("Service token authentication enabled for internal routes");
        }
        if config.payment_webhook_secret.is_some() {
            tracing::info!("Webhook signature verification enabled");
        }

        Self {
            pool,
            config,
            ledger,
        }
    }
}
