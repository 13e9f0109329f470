//! Crate-wide error kinds for the lab lifecycle and admission control subsystem.
//!
//! These are the error *kinds* from the design, not wire types: callers at the
//! (out-of-scope) HTTP boundary map each variant to a stable short code and
//! status, never forwarding the internal `Display` text verbatim to clients.

use std::collections::BTreeMap;

use thiserror::Error;

/// The dimension a quota check failed on, with both sides of the inequality.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaViolation {
    pub dimension: String,
    pub observed: i64,
    pub limit: i64,
}

impl std::fmt::Display for QuotaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: observed {} exceeds limit {}",
            self.dimension, self.observed, self.limit
        )
    }
}

/// Per-component outcome of a multi-component pause/resume/delete.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentOutcome {
    pub component: String,
    pub succeeded: bool,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {identifier}")]
    NotFound { kind: String, identifier: String },

    #[error("quota exceeded: {violation}")]
    QuotaExceeded { violation: QuotaViolation },

    #[error("conflict on {kind} '{identifier}': {reason}")]
    Conflict {
        kind: String,
        identifier: String,
        reason: String,
    },

    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(#[from] kube::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("partial failure across {} component(s)", .outcomes.len())]
    PartialFailure { outcomes: Vec<ComponentOutcome> },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }

    pub fn quota_exceeded(dimension: impl Into<String>, observed: i64, limit: i64) -> Self {
        Error::QuotaExceeded {
            violation: QuotaViolation {
                dimension: dimension.into(),
                observed,
                limit,
            },
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    /// Stable short code for the out-of-scope HTTP boundary to map onto a status.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::Conflict { .. } => "conflict",
            Error::ClusterUnavailable(_) => "cluster_unavailable",
            Error::InvalidInput(_) => "invalid_input",
            Error::PartialFailure { .. } => "partial_failure",
            Error::Database(_) => "database_error",
        }
    }
}

/// Summarize a set of per-component outcomes into a single result, following
/// the "no best-effort rollback" rule: any failure among included components
/// yields `PartialFailure` carrying every component's outcome.
pub fn summarize_components(outcomes: Vec<ComponentOutcome>) -> Result<()> {
    if outcomes.iter().all(|o| o.succeeded) {
        Ok(())
    } else {
        Err(Error::PartialFailure { outcomes })
    }
}

/// Build a map of component -> outcome for structured logging/reporting.
pub fn outcomes_by_component(outcomes: &[ComponentOutcome]) -> BTreeMap<String, bool> {
    outcomes
        .iter()
        .map(|o| (o.component.clone(), o.succeeded))
        .collect()
}
