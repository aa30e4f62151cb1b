//! Postgres bootstrap: pool and schema migrations.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connect and bring the schema up to date.
pub async fn setup_database(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("failed to connect to database")?;

    tracing::info!(max_connections, "database pool created");

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("failed to load migrations")?
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    tracing::info!("database migrations applied");
    Ok(pool)
}
