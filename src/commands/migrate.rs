use anyhow::{Context, Result};

use labondemand::{Config, db};

pub async fn run() -> Result<()> {
    let config = Config::from_env();
    println!("Connecting to {} ...", config.database_url);

    db::connect(&config.database_url)
        .await
        .context("Failed to connect and migrate database")?;

    println!("Migrations applied.");
    Ok(())
}
