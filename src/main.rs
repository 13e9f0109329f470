mod cli;
mod commands;

use clap::Parser;
use cli::{CatalogAction, Cli, Commands, QuotaAction};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Serve { addr } => commands::serve::run(addr).await?,
        Commands::ReconcileOnce => commands::reconcile_once::run().await?,
        Commands::Quota { action } => match action {
            QuotaAction::Show { user_id } => commands::quota::show(user_id).await?,
            QuotaAction::Set {
                user_id,
                max_apps,
                max_cpu_millis,
                max_mem_mi,
                max_storage_gi,
                expires_in_days,
                set_by,
            } => {
                commands::quota::set(
                    user_id,
                    max_apps,
                    max_cpu_millis,
                    max_mem_mi,
                    max_storage_gi,
                    expires_in_days,
                    set_by,
                )
                .await?
            }
            QuotaAction::Clear { user_id } => commands::quota::clear(user_id).await?,
        },
        Commands::Catalog { action } => match action {
            CatalogAction::List { active_only, students_only } => {
                commands::catalog::list(active_only, students_only).await?
            }
            CatalogAction::Deactivate { key } => commands::catalog::deactivate(key).await?,
        },
    }

    Ok(())
}
