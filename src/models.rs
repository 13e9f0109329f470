//! Persisted row types (§3 of the design): `users`, `deployments`,
//! `user_quota_overrides`, `templates`, `runtime_configs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's role. Unknown roles from upstream identity data are treated as
/// `Student` (least privilege) per §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    /// Parse an upstream role string, defaulting unknown values to `Student`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "teacher" => Role::Teacher,
            "admin" => Role::Admin,
            "student" => Role::Student,
            _ => Role::Student,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub role: Role,
    pub role_override: bool,
    pub external_id: Option<String>,
    pub auth_provider: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stack kind a lab is built from. `Custom` covers free-form single-container
/// labs that don't match a named recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StackKind {
    Custom,
    Vscode,
    Jupyter,
    Mysql,
    Lamp,
    Wordpress,
    Netbeans,
}

impl StackKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "custom" => Some(StackKind::Custom),
            "vscode" => Some(StackKind::Vscode),
            "jupyter" => Some(StackKind::Jupyter),
            "mysql" => Some(StackKind::Mysql),
            "lamp" => Some(StackKind::Lamp),
            "wordpress" => Some(StackKind::Wordpress),
            "netbeans" => Some(StackKind::Netbeans),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StackKind::Custom => "custom",
            StackKind::Vscode => "vscode",
            StackKind::Jupyter => "jupyter",
            StackKind::Mysql => "mysql",
            StackKind::Lamp => "lamp",
            StackKind::Wordpress => "wordpress",
            StackKind::Netbeans => "netbeans",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Active,
    Paused,
    Deleted,
}

/// One row per lab. See §3 for the invariants this type must uphold; they are
/// enforced by the `orchestrator`/`reconciler` modules, not by the type itself.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub stack: StackKind,
    pub namespace: String,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cpu_requested: i64,
    pub mem_requested_mi: i64,
    pub pod_count: i64,
}

/// At most one per user. Null fields mean "inherit from role default".
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QuotaOverride {
    pub id: i64,
    pub user_id: i64,
    pub max_apps: Option<i32>,
    pub max_cpu_millis: Option<i64>,
    pub max_mem_mi: Option<i64>,
    pub max_storage_gi: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
}

impl QuotaOverride {
    /// An override field is active when it is non-null and either has no
    /// expiry or has not yet expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub key: String,
    pub image: String,
    pub default_port: i32,
    pub exposure: String,
    pub tags: Vec<String>,
    pub allowed_for_students: bool,
    pub active: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub id: i64,
    pub key: String,
    pub min_cpu_request_millis: i64,
    pub min_cpu_limit_millis: i64,
    pub min_mem_request_mi: i64,
    pub min_mem_limit_mi: i64,
    pub active: bool,
}
