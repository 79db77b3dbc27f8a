//! Database pool and migration helpers

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Create the shared connection pool.
///
/// The acquire timeout bounds every store round-trip at the pool level so a
/// slow database surfaces as a request-scoped error instead of a hang. A
/// timed-out write must be treated as an unknown outcome by the caller.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Run embedded migrations. Called once at startup before serving traffic.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("../../migrations").run(pool).await
}
