//! Connection pool setup and schema migrations.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::Result;

/// Connect to Postgres and run pending migrations. Called once at boot by
/// every entry point in `commands::*`.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(sqlx::Error::from)?;
    info!("database_connected");
    Ok(pool)
}
