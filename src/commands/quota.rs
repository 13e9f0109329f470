use anyhow::{Context, Result};

use labondemand::Config;
use labondemand::audit;
use labondemand::db;
use labondemand::models::Role;
use labondemand::quota;

async fn user_role(pool: &sqlx::PgPool, user_id: i64) -> Result<Role> {
    let row: (Role,) = sqlx::query_as("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .with_context(|| format!("user {user_id} not found"))?;
    Ok(row.0)
}

pub async fn show(user_id: i64) -> Result<()> {
    let config = Config::from_env();
    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let role = user_role(&pool, user_id).await?;
    let limits = quota::effective_limits(&pool, user_id, role).await?;
    println!("user {user_id} ({role:?}):");
    println!("  max_apps         = {}", limits.max_apps);
    println!("  max_cpu_millis   = {}", limits.max_cpu_millis);
    println!("  max_mem_mi       = {}", limits.max_mem_mi);
    println!("  max_pods         = {} (role-derived, not overridable)", limits.max_pods);
    println!("  max_storage_gi   = {}", limits.max_storage_gi);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn set(
    user_id: i64,
    max_apps: Option<i32>,
    max_cpu_millis: Option<i64>,
    max_mem_mi: Option<i64>,
    max_storage_gi: Option<i32>,
    expires_in_days: Option<i64>,
    set_by: i64,
) -> Result<()> {
    let config = Config::from_env();
    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let expires_at = expires_in_days.map(|d| chrono::Utc::now() + chrono::Duration::days(d));

    sqlx::query(
        "INSERT INTO user_quota_overrides
            (user_id, max_apps, max_cpu_millis, max_mem_mi, max_storage_gi, expires_at, created_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (user_id) DO UPDATE SET
            max_apps = EXCLUDED.max_apps,
            max_cpu_millis = EXCLUDED.max_cpu_millis,
            max_mem_mi = EXCLUDED.max_mem_mi,
            max_storage_gi = EXCLUDED.max_storage_gi,
            expires_at = EXCLUDED.expires_at,
            created_by = EXCLUDED.created_by",
    )
    .bind(user_id)
    .bind(max_apps)
    .bind(max_cpu_millis)
    .bind(max_mem_mi)
    .bind(max_storage_gi)
    .bind(expires_at)
    .bind(set_by)
    .execute(&pool)
    .await?;

    audit::quota_override_set(user_id, set_by);
    println!("Quota override set for user {user_id}.");
    Ok(())
}

pub async fn clear(user_id: i64) -> Result<()> {
    let config = Config::from_env();
    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::query("DELETE FROM user_quota_overrides WHERE user_id = $1")
        .bind(user_id)
        .execute(&pool)
        .await?;

    println!("Quota override cleared for user {user_id}.");
    Ok(())
}
