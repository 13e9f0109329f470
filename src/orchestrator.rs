//! Deployment Orchestrator (§4.7, §4.9): `create`, `delete`, `pause`,
//! `resume`. Applies the object graph atomically with idempotent semantics
//! and records one row per lab.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use kube::Client;
use kube::api::{Api, ListParams, Patch, PatchParams};
use serde_json::json;
use sqlx::PgPool;
use tracing::warn;

use crate::admission::{self, ObservedUsage};
use crate::audit;
use crate::clamp::{self, ResourceRequest};
use crate::config::Config;
use crate::error::{ComponentOutcome, Error, Result};
use crate::models::{Deployment, DeploymentStatus, Role, RuntimeConfig, StackKind};
use crate::namespace;
use crate::quota;
use crate::stack::{self, LabParams};

pub const PAUSED_REPLICAS_ANNOTATION: &str = "labondemand.io/paused-replicas";
pub const PAUSE_DISABLED_ANNOTATION: &str = "labondemand.io/pause-disabled";

/// Everything a caller supplies to create a lab; resources are the *raw*
/// user request, clamped and floored inside `create`.
pub struct CreateRequest<'a> {
    pub user_id: i64,
    pub role: Role,
    pub role_override: bool,
    pub lab_name: &'a str,
    pub stack: StackKind,
    pub image_override: Option<&'a str>,
    pub requested: ResourceRequest,
}

pub struct CreateResult {
    pub deployment: Deployment,
    pub objects: Vec<stack::StackObject>,
    pub credentials: Vec<(String, String)>,
    pub access_urls: Vec<String>,
}

fn validate_lab_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 40
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if !valid {
        return Err(Error::invalid_input(format!(
            "lab name '{name}' must be 1-40 lowercase alphanumeric/hyphen characters"
        )));
    }
    Ok(())
}

fn planned_pods(stack: StackKind, replicas: i32) -> i64 {
    let components = crate::stack::blueprint::blueprint_for(stack).components.len() as i64;
    components * replicas as i64
}

/// §4.7 `create`: resolve namespace, clamp then floor, admit, insert the
/// row, then apply the object graph. On any admission failure the cluster is
/// never touched and no row is written.
pub async fn create(
    pool: &PgPool,
    client: &Client,
    config: &Config,
    req: CreateRequest<'_>,
) -> Result<CreateResult> {
    validate_lab_name(req.lab_name)?;
    let stack_key = req.stack.as_str();

    let namespace = namespace::ensure_namespace(client, config, req.user_id, req.role).await;

    let clamped = clamp::clamp(req.requested, req.role);
    let runtime = crate::catalog::get_runtime(pool, stack_key)
        .await
        .unwrap_or(RuntimeConfig {
            id: 0,
            key: stack_key.to_string(),
            min_cpu_request_millis: 0,
            min_cpu_limit_millis: 0,
            min_mem_request_mi: 0,
            min_mem_limit_mi: 0,
            active: true,
        });
    let resolved = clamp::apply_floor(clamped, &runtime);

    let limits = quota::effective_limits(pool, req.user_id, req.role).await?;
    let observed: ObservedUsage = admission::observed_usage(pool, req.user_id).await?;
    let pods = planned_pods(req.stack, resolved.replicas);
    admission::check_logical_quota(observed, resolved, pods, limits)?;
    admission::preflight_cluster_quota(
        client,
        &namespace,
        resolved.cpu_request_millis,
        resolved.mem_request_mi,
        pods,
    )
    .await?;

    let now = Utc::now();
    let expires_at = config
        .role_ttl_days(req.role)
        .map(|days| now + chrono::Duration::days(days));

    let deployment = sqlx::query_as::<_, Deployment>(
        "INSERT INTO deployments
            (user_id, name, stack, namespace, status, created_at, expires_at, cpu_requested, mem_requested_mi, pod_count)
         VALUES ($1, $2, $3, $4, 'active', $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(req.user_id)
    .bind(req.lab_name)
    .bind(req.stack)
    .bind(&namespace)
    .bind(now)
    .bind(expires_at)
    .bind(resolved.cpu_request_millis)
    .bind(resolved.mem_request_mi)
    .bind(pods)
    .fetch_one(pool)
    .await?;

    let params = LabParams {
        lab_name: req.lab_name,
        user_id: req.user_id,
        role: req.role,
        stack: req.stack,
        image_override: req.image_override,
        resources: resolved,
    };

    // A mid-sequence cluster failure is not rolled back: the row stays
    // `active` and the reconciler converges it later (§4.7 step 3).
    let outcome = stack::apply_stack(client, config, &namespace, &params).await?;

    audit::deployment_created(req.user_id, &namespace, req.lab_name, stack_key);

    Ok(CreateResult {
        deployment,
        objects: outcome.objects,
        credentials: outcome.credentials,
        access_urls: outcome.access_urls,
    })
}

async fn find_deployment(pool: &PgPool, namespace: &str, name: &str) -> Result<Deployment> {
    sqlx::query_as::<_, Deployment>(
        "SELECT * FROM deployments WHERE namespace = $1 AND name = $2 AND deleted_at IS NULL",
    )
    .bind(namespace)
    .bind(name)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found("deployment", format!("{namespace}/{name}")))
}

/// List the Deployments belonging to one lab (all components sharing the
/// `app=<lab-name>` label), for pause/resume/delete fan-out (§4.9).
async fn lab_deployments(client: &Client, namespace: &str, lab_name: &str) -> Result<Vec<K8sDeployment>> {
    let api: Api<K8sDeployment> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("managed-by=labondemand,app={lab_name}"));
    let list = api.list(&lp).await?;
    Ok(list.items)
}

fn is_pause_disabled(dep: &K8sDeployment) -> bool {
    dep.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PAUSE_DISABLED_ANNOTATION))
        .is_some_and(|v| v == "true")
}

/// §4.7 `pause` / §4.9: annotate each included component's Deployment with
/// its current replica count, then scale to zero. Components opted out via
/// `pause-disabled` are skipped (not failed). If any included component
/// cannot be paused, the whole call reports `PartialFailure`; components
/// already scaled to zero stay that way (no rollback).
pub async fn pause(pool: &PgPool, client: &Client, namespace: &str, lab_name: &str) -> Result<()> {
    let mut row = find_deployment(pool, namespace, lab_name).await?;
    if row.status != DeploymentStatus::Active {
        return Err(Error::Conflict {
            kind: "deployment".to_string(),
            identifier: lab_name.to_string(),
            reason: format!("cannot pause a lab in state {:?}", row.status),
        });
    }

    let deployments = lab_deployments(client, namespace, lab_name).await?;
    let api: Api<K8sDeployment> = Api::namespaced(client.clone(), namespace);
    let mut outcomes = Vec::new();

    for dep in &deployments {
        let name = dep.metadata.name.clone().unwrap_or_default();
        if is_pause_disabled(dep) {
            continue;
        }
        let current_replicas = dep
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);

        let patch = json!({
            "metadata": { "annotations": { PAUSED_REPLICAS_ANNOTATION: current_replicas.to_string() } },
            "spec": { "replicas": 0 }
        });

        let result = api
            .patch(&name, &PatchParams::apply(crate::k8s::FIELD_MANAGER), &Patch::Merge(&patch))
            .await;

        outcomes.push(ComponentOutcome {
            component: name.clone(),
            succeeded: result.is_ok(),
            detail: match result {
                Ok(_) => "scaled to zero".to_string(),
                Err(e) => e.to_string(),
            },
        });
    }

    let all_ok = outcomes.iter().all(|o| o.succeeded);

    row.status = DeploymentStatus::Paused;
    row.last_seen_at = Some(Utc::now());
    sqlx::query("UPDATE deployments SET status = 'paused', last_seen_at = $2 WHERE id = $1")
        .bind(row.id)
        .bind(row.last_seen_at)
        .execute(pool)
        .await?;

    audit::deployment_paused(row.user_id, namespace, lab_name);

    if all_ok {
        Ok(())
    } else {
        Err(Error::PartialFailure { outcomes })
    }
}

/// §4.7 `resume`: read the paused-replicas annotation (defaulting to 1 when
/// absent) and scale back, clearing the annotation.
pub async fn resume(pool: &PgPool, client: &Client, namespace: &str, lab_name: &str) -> Result<()> {
    let row = find_deployment(pool, namespace, lab_name).await?;
    if row.status != DeploymentStatus::Paused {
        return Err(Error::Conflict {
            kind: "deployment".to_string(),
            identifier: lab_name.to_string(),
            reason: format!("cannot resume a lab in state {:?}", row.status),
        });
    }

    let deployments = lab_deployments(client, namespace, lab_name).await?;
    let api: Api<K8sDeployment> = Api::namespaced(client.clone(), namespace);
    let mut outcomes = Vec::new();

    for dep in &deployments {
        let name = dep.metadata.name.clone().unwrap_or_default();
        let replicas: i32 = dep
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(PAUSED_REPLICAS_ANNOTATION))
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let patch = json!({
            "metadata": { "annotations": { PAUSED_REPLICAS_ANNOTATION: serde_json::Value::Null } },
            "spec": { "replicas": replicas }
        });

        let result = api
            .patch(&name, &PatchParams::apply(crate::k8s::FIELD_MANAGER), &Patch::Merge(&patch))
            .await;

        outcomes.push(ComponentOutcome {
            component: name.clone(),
            succeeded: result.is_ok(),
            detail: match result {
                Ok(_) => format!("scaled to {replicas}"),
                Err(e) => e.to_string(),
            },
        });
    }

    sqlx::query("UPDATE deployments SET status = 'active' WHERE id = $1")
        .bind(row.id)
        .execute(pool)
        .await?;

    audit::deployment_resumed(row.user_id, namespace, lab_name);

    crate::error::summarize_components(outcomes)
}

/// §4.7 `delete`: removes the Deployments/Services for the lab.
/// `delete_persistent=false` preserves Secrets and PVCs.
pub async fn delete(
    pool: &PgPool,
    client: &Client,
    namespace: &str,
    lab_name: &str,
    delete_persistent: bool,
) -> Result<()> {
    let row = find_deployment(pool, namespace, lab_name).await?;

    let dp: Api<K8sDeployment> = Api::namespaced(client.clone(), namespace);
    let svc: Api<k8s_openapi::api::core::v1::Service> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("managed-by=labondemand,app={lab_name}"));

    for dep in dp.list(&lp).await?.items {
        if let Some(name) = dep.metadata.name {
            if let Err(e) = dp.delete(&name, &Default::default()).await {
                warn!(namespace, name, error = %e, "deployment_delete_failed");
            }
        }
    }
    for service in svc.list(&lp).await?.items {
        if let Some(name) = service.metadata.name {
            if let Err(e) = svc.delete(&name, &Default::default()).await {
                warn!(namespace, name, error = %e, "service_delete_failed");
            }
        }
    }

    if delete_persistent {
        let secret: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(client.clone(), namespace);
        let pvc: Api<k8s_openapi::api::core::v1::PersistentVolumeClaim> =
            Api::namespaced(client.clone(), namespace);
        for s in secret.list(&lp).await?.items {
            if let Some(name) = s.metadata.name {
                let _ = secret.delete(&name, &Default::default()).await;
            }
        }
        for p in pvc.list(&lp).await?.items {
            if let Some(name) = p.metadata.name {
                let _ = pvc.delete(&name, &Default::default()).await;
            }
        }
    }

    sqlx::query("UPDATE deployments SET status = 'deleted', deleted_at = $2 WHERE id = $1")
        .bind(row.id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    audit::deployment_deleted(row.user_id, namespace, lab_name, delete_persistent);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_name_validation_rejects_bad_characters() {
        assert!(validate_lab_name("my-lab-1").is_ok());
        assert!(validate_lab_name("My_Lab").is_err());
        assert!(validate_lab_name("-leading").is_err());
        assert!(validate_lab_name("").is_err());
        assert!(validate_lab_name(&"a".repeat(41)).is_err());
    }

    #[test]
    fn planned_pods_scales_with_component_count_and_replicas() {
        assert_eq!(planned_pods(StackKind::Custom, 2), 2);
        assert_eq!(planned_pods(StackKind::Mysql, 1), 2);
        assert_eq!(planned_pods(StackKind::Lamp, 1), 3);
    }

    #[sqlx::test]
    async fn find_deployment_excludes_soft_deleted_rows(pool: PgPool) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO users (id, role, role_override, created_at) VALUES (1, 'student', false, now())",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "INSERT INTO deployments
                (user_id, name, stack, namespace, status, created_at, deleted_at, cpu_requested, mem_requested_mi, pod_count)
             VALUES (1, 'gone', 'custom', 'labondemand-user-1', 'deleted', now(), now(), 0, 0, 1)",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "INSERT INTO deployments
                (user_id, name, stack, namespace, status, created_at, cpu_requested, mem_requested_mi, pod_count)
             VALUES (1, 'live', 'custom', 'labondemand-user-1', 'active', now(), 0, 0, 1)",
        )
        .execute(&pool)
        .await?;

        assert!(find_deployment(&pool, "labondemand-user-1", "gone").await.is_err());
        let found = find_deployment(&pool, "labondemand-user-1", "live").await.unwrap();
        assert_eq!(found.name, "live");

        Ok(())
    }
}
