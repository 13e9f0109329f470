use labondemand::admission::{self, ObservedUsage};
use labondemand::clamp::{self, ResourceRequest};
use labondemand::models::{Role, RuntimeConfig};
use labondemand::quota;

fn raw_request() -> ResourceRequest {
    ResourceRequest {
        cpu_request_millis: 4_000,
        cpu_limit_millis: 8_000,
        mem_request_mi: 8_192,
        mem_limit_mi: 16_384,
        replicas: 5,
    }
}

fn jupyter_runtime() -> RuntimeConfig {
    RuntimeConfig {
        id: 1,
        key: "jupyter".into(),
        min_cpu_request_millis: 250,
        min_cpu_limit_millis: 500,
        min_mem_request_mi: 512,
        min_mem_limit_mi: 1_024,
        active: true,
    }
}

/// End-to-end pass through clamp -> floor -> quota merge -> logical admission,
/// the same sequence `orchestrator::create` runs (§4.7 step 1).
#[test]
fn student_oversized_request_is_clamped_then_admitted_within_role_budget() {
    let resolved = clamp::apply_floor(clamp::clamp(raw_request(), Role::Student), &jupyter_runtime());

    // Clamped to the student ceiling, never below the runtime floor.
    assert_eq!(resolved.cpu_request_millis, 1_000);
    assert_eq!(resolved.replicas, 2);

    let limits = quota::merge(Role::Student, None, chrono::Utc::now());
    let observed = ObservedUsage::default();

    admission::check_logical_quota(observed, resolved, resolved.replicas as i64, limits)
        .expect("a single fresh lab must fit a student's default quota");
}

/// A student already at their app budget is rejected even though the
/// individual request would clamp to something small (§8 scenario 1).
#[test]
fn student_already_at_app_budget_is_rejected_regardless_of_request_size() {
    let resolved = clamp::apply_floor(clamp::clamp(raw_request(), Role::Student), &jupyter_runtime());
    let limits = quota::merge(Role::Student, None, chrono::Utc::now());
    let observed = ObservedUsage {
        apps: limits.max_apps as i64,
        cpu_millis: 0,
        mem_mi: 0,
        pods: limits.max_apps as i64,
    };

    let err = admission::check_logical_quota(observed, resolved, 1, limits).unwrap_err();
    assert_eq!(err.code(), "quota_exceeded");
}

/// An active override raising `max_apps` admits a request a plain role
/// default would have rejected (§8 scenario 2).
#[test]
fn active_override_raises_the_ceiling_the_logical_check_applies() {
    let now = chrono::Utc::now();
    let generous = labondemand::models::QuotaOverride {
        id: 1,
        user_id: 9,
        max_apps: Some(50),
        max_cpu_millis: None,
        max_mem_mi: None,
        max_storage_gi: None,
        expires_at: Some(now + chrono::Duration::days(1)),
        created_at: now,
        created_by: Some(1),
    };

    let default_limits = quota::merge(Role::Student, None, now);
    let overridden_limits = quota::merge(Role::Student, Some(&generous), now);

    let resolved = clamp::apply_floor(clamp::clamp(raw_request(), Role::Student), &jupyter_runtime());
    let observed = ObservedUsage {
        apps: default_limits.max_apps as i64,
        cpu_millis: 0,
        mem_mi: 0,
        pods: default_limits.max_apps as i64,
    };

    assert!(admission::check_logical_quota(observed, resolved, 1, default_limits).is_err());
    assert!(admission::check_logical_quota(observed, resolved, 1, overridden_limits).is_ok());
}
