use anyhow::{Context, Result};

use labondemand::Config;
use labondemand::catalog;
use labondemand::db;

pub async fn list(active_only: bool, students_only: bool) -> Result<()> {
    let config = Config::from_env();
    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let templates = catalog::list_templates(&pool, active_only, students_only).await?;
    for t in templates {
        println!(
            "{:<16} {:<40} port={:<6} exposure={:<10} students={} active={}",
            t.key, t.image, t.default_port, t.exposure, t.allowed_for_students, t.active
        );
    }
    Ok(())
}

pub async fn deactivate(key: String) -> Result<()> {
    let config = Config::from_env();
    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    catalog::deactivate_template(&pool, &key).await?;
    println!("Deactivated template '{key}'.");
    Ok(())
}
