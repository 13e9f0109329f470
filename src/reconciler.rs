//! Lifecycle Reconciler (§4.8): a single cooperative loop, fixed-interval
//! timer, ordered phases. Each entity is wrapped in its own error boundary —
//! one entity's failure never aborts the cycle.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use k8s_openapi::api::core::v1::Namespace;
use kube::Client;
use kube::ResourceExt;
use kube::api::{Api, ListParams};
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::audit;
use crate::config::Config;
use crate::error::Result;
use crate::models::{Deployment, Role, StackKind};
use crate::namespace;
use crate::orchestrator;

/// Run one full reconciliation cycle: heal missing rows, expire-and-pause,
/// grace-expire-delete, backfill, orphan-namespace sweep, in that fixed
/// order (§4.8). Healing runs first so a deployment the cluster already has
/// but the database doesn't is visible to every later phase in this cycle.
pub async fn run_cycle(pool: &PgPool, client: &Client, config: &Config) {
    phase_heal_missing_rows(pool, client, config).await;
    phase_expire_and_pause(pool, client, config).await;
    phase_grace_expire_delete(pool, client, config).await;
    phase_backfill_expires_at(pool, config).await;
    phase_orphan_namespace_sweep(pool, client, config).await;
}

/// Phase 0: for every user, heal any cluster Deployment with no matching DB
/// row in their namespace (§4.8 auto-healing).
async fn phase_heal_missing_rows(pool: &PgPool, client: &Client, config: &Config) {
    let users: Vec<(i64, Role)> = match sqlx::query_as("SELECT id, role FROM users")
        .fetch_all(pool)
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "heal_missing_rows_user_query_failed");
            return;
        }
    };

    for (user_id, role) in users {
        let ns = namespace::namespace_name(config, user_id);
        match heal_missing_rows(pool, client, config, &ns, user_id, role).await {
            Ok(0) => {}
            Ok(healed) => info!(user_id, namespace = %ns, healed, "deployments_healed"),
            Err(e) => warn!(user_id, namespace = %ns, error = %e, "heal_missing_rows_failed"),
        }
    }
}

/// Start the long-lived reconciler task: fixed-interval timer from process
/// boot. If a cycle overruns the interval, the next tick is skipped rather
/// than piling up (§5 "Cancellation and timeouts").
pub async fn spawn(pool: PgPool, client: Client, config: Config) {
    let mut interval = tokio::time::interval(config.cleanup_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        info!("reconciler_cycle_starting");
        run_cycle(&pool, &client, &config).await;
        info!("reconciler_cycle_complete");
    }
}

/// Phase 1: pause every `active` lab whose `expires_at` has passed.
async fn phase_expire_and_pause(pool: &PgPool, client: &Client, config: &Config) {
    let rows = match sqlx::query_as::<_, Deployment>(
        "SELECT * FROM deployments WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1",
    )
    .bind(Utc::now())
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "expire_and_pause_query_failed");
            return;
        }
    };

    for row in rows {
        if let Err(e) = orchestrator::pause(pool, client, &row.namespace, &row.name).await {
            warn!(deployment_id = row.id, error = %e, "expire_pause_failed");
            continue;
        }
        audit::deployment_auto_paused_expired(row.user_id, &row.namespace, &row.name);
    }
    let _ = config;
}

/// Phase 2: hard-delete every `paused` lab whose grace period has elapsed.
async fn phase_grace_expire_delete(pool: &PgPool, client: &Client, config: &Config) {
    let cutoff = Utc::now() - chrono::Duration::days(config.lab_grace_period_days);
    let rows = match sqlx::query_as::<_, Deployment>(
        "SELECT * FROM deployments WHERE status = 'paused' AND last_seen_at IS NOT NULL AND last_seen_at <= $1",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "grace_expire_query_failed");
            return;
        }
    };

    for row in rows {
        // Reconciler-initiated grace sweeps default to deleting persistent
        // data (§4.7 "default is true for paused-grace-expired sweeps").
        if let Err(e) = orchestrator::delete(pool, client, &row.namespace, &row.name, true).await {
            warn!(deployment_id = row.id, error = %e, "grace_delete_failed");
            continue;
        }
        audit::deployment_auto_deleted_grace_expired(row.user_id, &row.namespace, &row.name);
    }
}

/// Phase 3: set `expires_at` for active admin-owned-exempt rows that are
/// missing it, using `created_at + role_TTL`.
async fn phase_backfill_expires_at(pool: &PgPool, config: &Config) {
    let rows = match sqlx::query_as::<_, Deployment>(
        "SELECT d.* FROM deployments d
         JOIN users u ON u.id = d.user_id
         WHERE d.status = 'active' AND d.expires_at IS NULL AND u.role <> 'admin'",
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "backfill_query_failed");
            return;
        }
    };

    for row in rows {
        let role = role_for_deployment(pool, row.user_id).await.unwrap_or(Role::Student);
        let Some(expires_at) = ttl_expires_at(row.created_at, role, config) else {
            continue;
        };
        if let Err(e) = sqlx::query("UPDATE deployments SET expires_at = $2 WHERE id = $1")
            .bind(row.id)
            .bind(expires_at)
            .execute(pool)
            .await
        {
            warn!(deployment_id = row.id, error = %e, "backfill_update_failed");
            continue;
        }
        audit::deployment_expires_at_backfilled(row.id, expires_at);
    }
}

/// Compute `expires_at` from a lab's own creation time, not `now` — shared by
/// the backfill phase and auto-healing so both preserve the TTL the lab was
/// actually created with (§8 "TTL preservation on heal").
fn ttl_expires_at(created_at: DateTime<Utc>, role: Role, config: &Config) -> Option<DateTime<Utc>> {
    config.role_ttl_days(role).map(|days| created_at + chrono::Duration::days(days))
}

async fn role_for_deployment(pool: &PgPool, user_id: i64) -> Result<Role> {
    let role: (Role,) = sqlx::query_as("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    Ok(role.0)
}

/// Phase 4: delete cluster namespaces with no corresponding user row, after
/// both guards clear (§4.8, §8 "Orphan sweep safety").
async fn phase_orphan_namespace_sweep(pool: &PgPool, client: &Client, config: &Config) {
    let api: Api<Namespace> = Api::all(client.clone());
    let list = match api.list(&ListParams::default()).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "orphan_sweep_list_failed");
            return;
        }
    };

    for ns in list.items {
        let name = ns.name_any();
        let Some(user_id) = extract_user_id(&name, &config.user_namespace_prefix) else {
            continue;
        };

        let user_exists: (bool,) = match sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(pool)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, namespace = %name, "orphan_sweep_user_check_failed");
                continue;
            }
        };
        if user_exists.0 {
            continue;
        }

        // Guard A: DB liveness. A non-deleted row referencing this user id
        // protects against user-row renumbering during SSO reconciliation.
        let has_live_rows: (bool,) = match sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM deployments WHERE user_id = $1 AND status <> 'deleted')",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, namespace = %name, "orphan_sweep_liveness_check_failed");
                continue;
            }
        };
        if has_live_rows.0 {
            audit::orphan_namespace_skipped(&name, "active_deployments");
            continue;
        }

        // Guard B: age grace. A namespace younger than the grace window may
        // still belong to a user pending SSO re-login.
        let created_at = ns.creation_timestamp().map(|t| t.0);
        if let Some(created_at) = created_at {
            let grace_cutoff = Utc::now() - chrono::Duration::days(config.orphan_ns_grace_days);
            if created_at > grace_cutoff {
                audit::orphan_namespace_skipped(&name, "age_grace");
                continue;
            }
        }

        crate::k8s::delete_namespace_best_effort(client, &name).await;
        audit::orphan_namespace_deleted(&name);
    }
}

fn extract_user_id(namespace: &str, prefix: &str) -> Option<i64> {
    namespace.strip_prefix(prefix)?.parse().ok()
}

/// Auto-healing on list (§4.8): cluster Deployments labeled
/// `managed-by=labondemand` with no DB row get one inserted, with
/// `expires_at` computed from the *cluster object's* creation timestamp, not
/// `now` — preserving the intended lifetime (§8 "TTL preservation on heal").
pub async fn heal_missing_rows(
    pool: &PgPool,
    client: &Client,
    config: &Config,
    namespace: &str,
    user_id: i64,
    role: Role,
) -> Result<usize> {
    let api: Api<K8sDeployment> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("managed-by=labondemand,user-id={user_id}"));
    let list = api.list(&lp).await?;

    // Group by lab name first: a multi-component stack surfaces one
    // Deployment object per component, and `pod_count` must reflect all of
    // them, not just whichever component is seen first.
    let mut groups: std::collections::BTreeMap<String, (StackKind, chrono::DateTime<Utc>, i64)> =
        std::collections::BTreeMap::new();
    for dep in &list.items {
        let Some(lab_name) = dep
            .labels()
            .get("app")
            .cloned()
            .or_else(|| dep.metadata.name.clone())
        else {
            continue;
        };
        let stack = dep
            .labels()
            .get("stack")
            .and_then(|s| StackKind::parse(s))
            .unwrap_or(StackKind::Custom);
        let created_at = dep.creation_timestamp().map(|t| t.0).unwrap_or_else(Utc::now);

        groups
            .entry(lab_name)
            .and_modify(|(_, earliest, count)| {
                *earliest = (*earliest).min(created_at);
                *count += 1;
            })
            .or_insert((stack, created_at, 1));
    }

    let mut healed = 0;
    for (lab_name, (stack, created_at, pod_count)) in groups {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM deployments WHERE namespace = $1 AND name = $2)",
        )
        .bind(namespace)
        .bind(&lab_name)
        .fetch_one(pool)
        .await?;
        if exists.0 {
            continue;
        }

        let expires_at = ttl_expires_at(created_at, role, config);

        sqlx::query(
            "INSERT INTO deployments
                (user_id, name, stack, namespace, status, created_at, expires_at, cpu_requested, mem_requested_mi, pod_count)
             VALUES ($1, $2, $3, $4, 'active', $5, $6, 0, 0, $7)",
        )
        .bind(user_id)
        .bind(&lab_name)
        .bind(stack)
        .bind(namespace)
        .bind(created_at)
        .bind(expires_at)
        .bind(pod_count)
        .execute(pool)
        .await?;

        healed += 1;
    }

    Ok(healed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_user_id_parses_numeric_suffix() {
        assert_eq!(extract_user_id("labondemand-user-42", "labondemand-user-"), Some(42));
        assert_eq!(extract_user_id("labondemand-user-abc", "labondemand-user-"), None);
        assert_eq!(extract_user_id("kube-system", "labondemand-user-"), None);
    }

    #[test]
    fn ttl_expires_at_preserves_creation_timestamp() {
        let mut config = Config::from_env();
        config.lab_ttl_student_days = 7;
        config.lab_ttl_teacher_days = 30;
        let created_at = Utc::now() - chrono::Duration::days(5);

        // A lab healed or backfilled long after it was created still expires
        // `role_ttl` days after its own creation, not after `now`.
        let student_expiry = ttl_expires_at(created_at, Role::Student, &config).unwrap();
        assert_eq!(student_expiry, created_at + chrono::Duration::days(7));

        let teacher_expiry = ttl_expires_at(created_at, Role::Teacher, &config).unwrap();
        assert_eq!(teacher_expiry, created_at + chrono::Duration::days(30));

        assert_eq!(ttl_expires_at(created_at, Role::Admin, &config), None);
    }

    #[sqlx::test]
    async fn backfill_sets_expires_at_from_created_at(pool: PgPool) -> sqlx::Result<()> {
        let created_at = Utc::now() - chrono::Duration::days(2);
        sqlx::query(
            "INSERT INTO users (id, role, role_override, created_at) VALUES (1, 'student', false, now())",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "INSERT INTO deployments
                (user_id, name, stack, namespace, status, created_at, cpu_requested, mem_requested_mi, pod_count)
             VALUES (1, 'lab1', 'custom', 'labondemand-user-1', 'active', $1, 0, 0, 1)",
        )
        .bind(created_at)
        .execute(&pool)
        .await?;

        let config = Config::from_env();
        phase_backfill_expires_at(&pool, &config).await;

        let row: (Option<DateTime<Utc>>,) = sqlx::query_as("SELECT expires_at FROM deployments WHERE name = 'lab1'")
            .fetch_one(&pool)
            .await?;
        let expires_at = row.0.expect("expires_at should have been backfilled");
        assert_eq!(expires_at, created_at + chrono::Duration::days(config.lab_ttl_student_days));

        Ok(())
    }
}
