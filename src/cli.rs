use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "labondemand")]
#[command(about = "Multi-tenant lab lifecycle and admission control for Kubernetes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations and exit
    Migrate,

    /// Start the reconciler loop and the health/readiness HTTP surface
    Serve {
        #[arg(long, default_value = "0.0.0.0:9090")]
        addr: String,
    },

    /// Run a single reconciliation cycle and exit
    ReconcileOnce,

    /// Manage per-user quota overrides
    Quota {
        #[command(subcommand)]
        action: QuotaAction,
    },

    /// Manage the lab template and runtime config catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
}

#[derive(Subcommand)]
pub enum QuotaAction {
    /// Show the effective limits for a user (role default merged with any override)
    Show { user_id: i64 },

    /// Set or update a user's quota override
    Set {
        user_id: i64,
        #[arg(long)]
        max_apps: Option<i32>,
        #[arg(long)]
        max_cpu_millis: Option<i64>,
        #[arg(long)]
        max_mem_mi: Option<i64>,
        #[arg(long)]
        max_storage_gi: Option<i32>,
        #[arg(long)]
        expires_in_days: Option<i64>,
        #[arg(long)]
        set_by: i64,
    },

    /// Remove a user's quota override, reverting to the role default
    Clear { user_id: i64 },
}

#[derive(Subcommand)]
pub enum CatalogAction {
    /// List templates
    List {
        #[arg(long)]
        active_only: bool,
        #[arg(long)]
        students_only: bool,
    },

    /// Deactivate a template by key
    Deactivate { key: String },
}
