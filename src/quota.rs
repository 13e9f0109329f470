//! Quota Resolver (§4.2): merges role defaults with an active per-user
//! override into the view admission checks against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::Result;
use crate::models::{QuotaOverride, Role};

/// The merged view `admit()` checks against. Always fully defined: role
/// defaults are dense, so there is no error path here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveLimits {
    pub max_apps: i32,
    pub max_cpu_millis: i64,
    pub max_mem_mi: i64,
    pub max_pods: i32,
    pub max_storage_gi: i32,
}

/// Dense role-default table. `max_pods` is role-derived only; it has no
/// override field in `user_quota_overrides` (§4 of the design).
fn role_defaults(role: Role) -> EffectiveLimits {
    match role {
        Role::Student => EffectiveLimits {
            max_apps: 4,
            max_cpu_millis: 2_500,
            max_mem_mi: 6_144,
            max_pods: 6,
            max_storage_gi: 2,
        },
        Role::Teacher => EffectiveLimits {
            max_apps: 15,
            max_cpu_millis: 4_000,
            max_mem_mi: 8_192,
            max_pods: 20,
            max_storage_gi: 20,
        },
        Role::Admin => EffectiveLimits {
            max_apps: 200,
            max_cpu_millis: 64_000,
            max_mem_mi: 131_072,
            max_pods: 200,
            max_storage_gi: 2_048,
        },
    }
}

/// Merge role defaults with an optional override, honoring expiry.
///
/// For each field: use the override's value if it is `Some` AND the override
/// as a whole is still active (`expires_at` null or in the future);
/// otherwise fall back to the role default. This is a pure function —
/// callers that need "as of now" semantics pass `now` explicitly so tests can
/// move the clock without sleeping.
pub fn merge(role: Role, override_row: Option<&QuotaOverride>, now: DateTime<Utc>) -> EffectiveLimits {
    let defaults = role_defaults(role);
    let Some(o) = override_row else {
        return defaults;
    };
    if !o.is_active(now) {
        return defaults;
    }

    EffectiveLimits {
        max_apps: o.max_apps.unwrap_or(defaults.max_apps),
        max_cpu_millis: o.max_cpu_millis.unwrap_or(defaults.max_cpu_millis),
        max_mem_mi: o.max_mem_mi.unwrap_or(defaults.max_mem_mi),
        max_pods: defaults.max_pods,
        max_storage_gi: o.max_storage_gi.unwrap_or(defaults.max_storage_gi),
    }
}

/// Load the user's role and override row and compute `effective_limits`.
/// Unknown roles are treated as `Student` by `Role::parse_lenient` upstream;
/// this function trusts the role already resolved on the `User` row.
pub async fn effective_limits(pool: &PgPool, user_id: i64, role: Role) -> Result<EffectiveLimits> {
    let override_row = sqlx::query_as::<_, QuotaOverride>(
        "SELECT * FROM user_quota_overrides WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(merge(role, override_row.as_ref(), Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn override_row(max_apps: Option<i32>, expires_at: Option<DateTime<Utc>>) -> QuotaOverride {
        QuotaOverride {
            id: 1,
            user_id: 1,
            max_apps,
            max_cpu_millis: None,
            max_mem_mi: None,
            max_storage_gi: None,
            expires_at,
            created_at: Utc::now(),
            created_by: None,
        }
    }

    #[test]
    fn no_override_returns_role_defaults() {
        let limits = merge(Role::Student, None, Utc::now());
        assert_eq!(limits.max_apps, 4);
    }

    #[test]
    fn override_merge_determinism() {
        // scenario 2 from the design's seed tests
        let now = Utc::now();
        let active = override_row(Some(8), Some(now + chrono::Duration::days(1)));
        let limits = merge(Role::Student, Some(&active), now);
        assert_eq!(limits.max_apps, 8);
        assert_eq!(limits.max_cpu_millis, 2_500); // inherited: field left null

        let expired = override_row(Some(8), Some(now - chrono::Duration::days(1)));
        let limits = merge(Role::Student, Some(&expired), now);
        assert_eq!(limits.max_apps, 4);
    }

    #[test]
    fn null_field_is_identical_to_absent_override() {
        let now = Utc::now();
        let null_field = override_row(None, None);
        let with_override = merge(Role::Student, Some(&null_field), now);
        let without_override = merge(Role::Student, None, now);
        assert_eq!(with_override, without_override);
    }

    #[test]
    fn unknown_role_is_least_privilege() {
        let student = role_defaults(Role::Student);
        let teacher = role_defaults(Role::Teacher);
        assert!(student.max_apps <= teacher.max_apps);
        assert!(student.max_cpu_millis <= teacher.max_cpu_millis);
    }
}
