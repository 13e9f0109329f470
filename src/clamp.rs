//! Resource Clamper (§4.4): reduces a user's requested resources to
//! per-role ceilings. Pure function, order-sensitive — clamp runs before
//! runtime-config floors are applied (§4.4, §4.7 step 1).

use serde::{Deserialize, Serialize};

use crate::models::Role;

/// A single lab's requested resources, before or after clamping/flooring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_request_millis: i64,
    pub cpu_limit_millis: i64,
    pub mem_request_mi: i64,
    pub mem_limit_mi: i64,
    pub replicas: i32,
}

/// Per-role ceiling a single lab's request may not exceed. Distinct from the
/// namespace-wide `ResourceQuota` in `namespace` — this bounds one lab, the
/// quota bounds the sum of all of a user's labs.
#[derive(Debug, Clone, Copy)]
struct RoleCeiling {
    cpu_request_millis: i64,
    cpu_limit_millis: i64,
    mem_request_mi: i64,
    mem_limit_mi: i64,
    max_replicas: i32,
}

fn role_ceiling(role: Role) -> RoleCeiling {
    match role {
        Role::Student => RoleCeiling {
            cpu_request_millis: 1_000,
            cpu_limit_millis: 2_000,
            mem_request_mi: 2_048,
            mem_limit_mi: 4_096,
            max_replicas: 2,
        },
        Role::Teacher => RoleCeiling {
            cpu_request_millis: 2_000,
            cpu_limit_millis: 4_000,
            mem_request_mi: 4_096,
            mem_limit_mi: 8_192,
            max_replicas: 4,
        },
        Role::Admin => RoleCeiling {
            cpu_request_millis: 32_000,
            cpu_limit_millis: 64_000,
            mem_request_mi: 65_536,
            mem_limit_mi: 131_072,
            max_replicas: 20,
        },
    }
}

/// Lower `requested` to the role's ceiling on every dimension. Never raises a
/// value — that is the runtime-config floor's job, applied afterward.
pub fn clamp(requested: ResourceRequest, role: Role) -> ResourceRequest {
    let ceiling = role_ceiling(role);
    ResourceRequest {
        cpu_request_millis: requested.cpu_request_millis.min(ceiling.cpu_request_millis),
        cpu_limit_millis: requested.cpu_limit_millis.min(ceiling.cpu_limit_millis),
        mem_request_mi: requested.mem_request_mi.min(ceiling.mem_request_mi),
        mem_limit_mi: requested.mem_limit_mi.min(ceiling.mem_limit_mi),
        replicas: requested.replicas.min(ceiling.max_replicas),
    }
}

/// Raise any dimension below the stack kind's minimum working floor. Applied
/// strictly after `clamp` (§4.4's ordering invariant).
pub fn apply_floor(resolved: ResourceRequest, runtime: &crate::models::RuntimeConfig) -> ResourceRequest {
    ResourceRequest {
        cpu_request_millis: resolved
            .cpu_request_millis
            .max(runtime.min_cpu_request_millis),
        cpu_limit_millis: resolved.cpu_limit_millis.max(runtime.min_cpu_limit_millis),
        mem_request_mi: resolved.mem_request_mi.max(runtime.min_mem_request_mi),
        mem_limit_mi: resolved.mem_limit_mi.max(runtime.min_mem_limit_mi),
        replicas: resolved.replicas.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(cpu_r: i64, cpu_l: i64, mem_r: i64, mem_l: i64, replicas: i32) -> ResourceRequest {
        ResourceRequest {
            cpu_request_millis: cpu_r,
            cpu_limit_millis: cpu_l,
            mem_request_mi: mem_r,
            mem_limit_mi: mem_l,
            replicas,
        }
    }

    #[test]
    fn clamp_lowers_above_ceiling() {
        let requested = req(5_000, 8_000, 16_384, 32_768, 10);
        let clamped = clamp(requested, Role::Student);
        assert_eq!(clamped.cpu_request_millis, 1_000);
        assert_eq!(clamped.cpu_limit_millis, 2_000);
        assert_eq!(clamped.mem_request_mi, 2_048);
        assert_eq!(clamped.mem_limit_mi, 4_096);
        assert_eq!(clamped.replicas, 2);
    }

    #[test]
    fn clamp_never_raises() {
        let requested = req(10, 20, 32, 64, 1);
        let clamped = clamp(requested, Role::Student);
        assert_eq!(clamped, requested);
    }

    #[test]
    fn clamp_idempotence() {
        for role in [Role::Student, Role::Teacher, Role::Admin] {
            let requested = req(99_999, 99_999, 999_999, 999_999, 999);
            let once = clamp(requested, role);
            let twice = clamp(once, role);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn floor_raises_below_minimum_after_clamp() {
        let runtime = crate::models::RuntimeConfig {
            id: 1,
            key: "jupyter".into(),
            min_cpu_request_millis: 500,
            min_cpu_limit_millis: 1_000,
            min_mem_request_mi: 1_024,
            min_mem_limit_mi: 2_048,
            active: true,
        };
        let requested = req(10, 10, 10, 10, 0);
        let clamped = clamp(requested, Role::Student);
        let floored = apply_floor(clamped, &runtime);
        assert_eq!(floored.cpu_request_millis, 500);
        assert_eq!(floored.cpu_limit_millis, 1_000);
        assert_eq!(floored.mem_request_mi, 1_024);
        assert_eq!(floored.mem_limit_mi, 2_048);
        assert_eq!(floored.replicas, 1);
    }
}
