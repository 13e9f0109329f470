//! Admission Pipeline (§4.6): logical quota then cluster-quota preflight,
//! strictly in that order, both read-only.

use k8s_openapi::api::core::v1::ResourceQuota;
use kube::Client;
use kube::api::Api;
use sqlx::PgPool;

use crate::clamp::ResourceRequest;
use crate::error::{Error, Result};
use crate::namespace::BASELINE_QUOTA_NAME;
use crate::quota::EffectiveLimits;

/// Aggregated usage across a user's existing `active` deployment rows —
/// never live pod metrics (§4.6 step 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedUsage {
    pub apps: i64,
    pub cpu_millis: i64,
    pub mem_mi: i64,
    pub pods: i64,
}

pub async fn observed_usage(pool: &PgPool, user_id: i64) -> Result<ObservedUsage> {
    let row: (i64, i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(cpu_requested), 0), COALESCE(SUM(mem_requested_mi), 0),
                COALESCE(SUM(pod_count), 0)
         FROM deployments WHERE user_id = $1 AND status = 'active'",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(ObservedUsage {
        apps: row.0,
        cpu_millis: row.1,
        mem_mi: row.2,
        // Each row's own `pod_count` (components * replicas at create time)
        // is summed, not the row count — a multi-component stack like lamp
        // counts as 3 pods toward `max_pods`, not 1 (§4.6, DESIGN.md).
        pods: row.3,
    })
}

/// Step 1 of §4.6: compare `observed + planned` against the user's
/// effective limits. Pure given its inputs — callers fetch `observed` fresh
/// immediately before calling, per §5's racy-admission note.
pub fn check_logical_quota(
    observed: ObservedUsage,
    planned: ResourceRequest,
    planned_pods: i64,
    limits: EffectiveLimits,
) -> Result<()> {
    let apps_after = observed.apps + 1;
    if apps_after > limits.max_apps as i64 {
        return Err(Error::quota_exceeded("max_apps", apps_after, limits.max_apps as i64));
    }

    let cpu_after = observed.cpu_millis + planned.cpu_request_millis;
    if cpu_after > limits.max_cpu_millis {
        return Err(Error::quota_exceeded("max_cpu_millis", cpu_after, limits.max_cpu_millis));
    }

    let mem_after = observed.mem_mi + planned.mem_request_mi;
    if mem_after > limits.max_mem_mi {
        return Err(Error::quota_exceeded("max_mem_mi", mem_after, limits.max_mem_mi));
    }

    let pods_after = observed.pods + planned_pods;
    if pods_after > limits.max_pods as i64 {
        return Err(Error::quota_exceeded("max_pods", pods_after, limits.max_pods as i64));
    }

    Ok(())
}

/// Parse a Kubernetes resource `Quantity` string into millis/mebibytes-ish
/// integer units consistent with how `planned` is expressed. Only the
/// suffixes the baseline quota actually uses are handled; anything else
/// falls back to a bare integer parse.
fn quantity_to_i64(q: &str) -> i64 {
    if let Some(stripped) = q.strip_suffix('m') {
        return stripped.parse().unwrap_or(0);
    }
    if let Some(stripped) = q.strip_suffix("Gi") {
        return stripped.parse::<i64>().unwrap_or(0) * 1000;
    }
    if let Some(stripped) = q.strip_suffix("Mi") {
        return stripped.parse().unwrap_or(0);
    }
    if let Some(stripped) = q.strip_suffix("Ti") {
        return stripped.parse::<i64>().unwrap_or(0) * 1_000_000;
    }
    // Bare integer cpu core count -> millis.
    q.parse::<i64>().map(|c| c * 1000).unwrap_or(0)
}

/// Step 2 of §4.6: for every resource named in the namespace's
/// `ResourceQuota.status.hard`, reject if `used + planned > hard`. Reports
/// the first violated resource with both sides of the inequality.
pub async fn preflight_cluster_quota(
    client: &Client,
    namespace: &str,
    planned_cpu_millis: i64,
    planned_mem_mi: i64,
    planned_pods: i64,
) -> Result<()> {
    let api: Api<ResourceQuota> = Api::namespaced(client.clone(), namespace);
    let quota = match api.get_opt(BASELINE_QUOTA_NAME).await? {
        Some(q) => q,
        None => return Ok(()), // no baseline quota yet; nothing to preflight against
    };

    let Some(status) = quota.status else {
        return Ok(());
    };
    let Some(hard) = status.hard else {
        return Ok(());
    };
    let used = status.used.unwrap_or_default();

    let planned_for = |resource: &str| -> i64 {
        match resource {
            "requests.cpu" | "limits.cpu" => planned_cpu_millis,
            "requests.memory" | "limits.memory" => planned_mem_mi,
            "pods" => planned_pods,
            _ => 0,
        }
    };

    for (resource, hard_qty) in &hard {
        let planned = planned_for(resource);
        if planned == 0 {
            continue;
        }
        let hard_value = quantity_to_i64(&hard_qty.0);
        let used_value = used
            .get(resource)
            .map(|q| quantity_to_i64(&q.0))
            .unwrap_or(0);
        let after = used_value + planned;
        if after > hard_value {
            return Err(Error::quota_exceeded(resource.clone(), after, hard_value));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::EffectiveLimits;

    fn limits() -> EffectiveLimits {
        EffectiveLimits {
            max_apps: 4,
            max_cpu_millis: 2_500,
            max_mem_mi: 6_144,
            max_pods: 6,
            max_storage_gi: 2,
        }
    }

    fn req() -> ResourceRequest {
        ResourceRequest {
            cpu_request_millis: 500,
            cpu_limit_millis: 1_000,
            mem_request_mi: 512,
            mem_limit_mi: 1_024,
            replicas: 1,
        }
    }

    #[test]
    fn student_at_quota_is_rejected() {
        // scenario 1 from the design's seed tests
        let observed = ObservedUsage {
            apps: 4,
            cpu_millis: 1_000,
            mem_mi: 1_024,
            pods: 4,
        };
        let err = check_logical_quota(observed, req(), 1, limits()).unwrap_err();
        match err {
            Error::QuotaExceeded { violation } => {
                assert_eq!(violation.dimension, "max_apps");
                assert_eq!(violation.observed, 5);
                assert_eq!(violation.limit, 4);
            }
            _ => panic!("expected QuotaExceeded"),
        }
    }

    #[test]
    fn admission_monotonicity_under_decreased_limit() {
        let observed = ObservedUsage {
            apps: 3,
            cpu_millis: 0,
            mem_mi: 0,
            pods: 3,
        };
        let mut shrunk = limits();
        shrunk.max_apps = 3;
        assert!(check_logical_quota(observed, req(), 1, shrunk).is_err());
    }

    #[test]
    fn quantity_parsing_handles_common_suffixes() {
        assert_eq!(quantity_to_i64("2500m"), 2500);
        assert_eq!(quantity_to_i64("5"), 5000);
        assert_eq!(quantity_to_i64("8Gi"), 8000);
        assert_eq!(quantity_to_i64("512Mi"), 512);
    }

    #[sqlx::test]
    async fn observed_usage_sums_pod_count_not_row_count(pool: PgPool) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO users (id, role, role_override, created_at) VALUES (1, 'student', false, now())",
        )
        .execute(&pool)
        .await?;
        // One single-pod custom lab and one three-pod lamp lab: two rows, four pods.
        sqlx::query(
            "INSERT INTO deployments
                (user_id, name, stack, namespace, status, created_at, cpu_requested, mem_requested_mi, pod_count)
             VALUES (1, 'solo', 'custom', 'labondemand-user-1', 'active', now(), 100, 128, 1)",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "INSERT INTO deployments
                (user_id, name, stack, namespace, status, created_at, cpu_requested, mem_requested_mi, pod_count)
             VALUES (1, 'lampstack', 'lamp', 'labondemand-user-1', 'active', now(), 300, 512, 3)",
        )
        .execute(&pool)
        .await?;

        let usage = observed_usage(&pool, 1).await.unwrap();
        assert_eq!(usage.apps, 2);
        assert_eq!(usage.pods, 4);
        assert_eq!(usage.cpu_millis, 400);
        assert_eq!(usage.mem_mi, 640);

        Ok(())
    }
}
