//! Connection pool bootstrap and migration runner.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Opens a tuned connection pool and runs pending migrations.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let slow_threshold = Duration::from_secs(1);

    let pool = PgPoolOptions::new()
        .min_connections(0)
        .max_connections(10)
        .acquire_slow_threshold(slow_threshold)
        .acquire_timeout(Duration::from_secs(4))
        .idle_timeout(Duration::from_secs(2 * 60))
        .max_lifetime(Duration::from_secs(30 * 60))
        .connect(database_url)
        .await?;

    info!("running pending migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
