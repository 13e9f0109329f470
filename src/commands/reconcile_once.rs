use anyhow::{Context, Result};
use kube::Client;

use labondemand::{Config, db, reconciler};

pub async fn run() -> Result<()> {
    let config = Config::from_env();

    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;

    println!("Running one reconciliation cycle...");
    reconciler::run_cycle(&pool, &client, &config).await;
    println!("Cycle complete.");
    Ok(())
}
