//! Audit event emission (§6 "Audit events emitted"). The audit-log reader
//! itself is out of scope — this module is the logger boundary: each
//! function emits one structured `tracing` event whose `event` field matches
//! the event name from the design. Consumers tail the process's JSON-lines
//! log, same as the teacher's `tracing-subscriber` json layer.

use tracing::info;

pub fn deployment_created(user_id: i64, namespace: &str, name: &str, stack: &str) {
    info!(event = "deployment_created", user_id, namespace, name, stack, "audit");
}

pub fn deployment_deleted(user_id: i64, namespace: &str, name: &str, delete_persistent: bool) {
    info!(event = "deployment_deleted", user_id, namespace, name, delete_persistent, "audit");
}

pub fn deployment_paused(user_id: i64, namespace: &str, name: &str) {
    info!(event = "deployment_paused", user_id, namespace, name, "audit");
}

pub fn deployment_resumed(user_id: i64, namespace: &str, name: &str) {
    info!(event = "deployment_resumed", user_id, namespace, name, "audit");
}

pub fn deployment_auto_paused_expired(user_id: i64, namespace: &str, name: &str) {
    info!(event = "deployment_auto_paused_expired", user_id, namespace, name, "audit");
}

pub fn deployment_auto_deleted_grace_expired(user_id: i64, namespace: &str, name: &str) {
    info!(event = "deployment_auto_deleted_grace_expired", user_id, namespace, name, "audit");
}

pub fn orphan_namespace_deleted(namespace: &str) {
    info!(event = "orphan_namespace_deleted", namespace, "audit");
}

pub fn orphan_namespace_skipped(namespace: &str, reason: &str) {
    info!(event = "orphan_namespace_skipped", namespace, reason, "audit");
}

pub fn deployment_expires_at_backfilled(deployment_id: i64, expires_at: chrono::DateTime<chrono::Utc>) {
    info!(
        event = "deployment_expires_at_backfilled",
        deployment_id,
        expires_at = %expires_at,
        "audit"
    );
}

pub fn quota_override_set(user_id: i64, set_by: i64) {
    info!(event = "quota_override_set", user_id, set_by, "audit");
}
