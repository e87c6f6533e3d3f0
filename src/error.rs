/// Reconciliation error taxonomy
///
/// Every failure in the reconciliation engine falls into one of five classes,
/// and callers branch on the class: configuration problems need no retry until
/// configuration changes, transient problems were already retried at the call
/// site, conflicts require explicit operator action, fatal problems aborted
/// before any mutation, and partial problems were rolled back and reported
/// per item.

use thiserror::Error;

/// Typed error for the reconciliation engine.
///
/// Variants carry the specific item and the specific missing/conflicting
/// artifact so that user-visible messages are never generic.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Repository or runtime endpoint is not configured for an environment.
    /// No retry is useful until configuration changes.
    #[error("{what} is not configured for environment '{environment}'")]
    Configuration { environment: String, what: String },

    /// A network-level failure that persisted through bounded retries.
    #[error("transient failure in {operation} after {attempts} attempts: {message}")]
    Transient {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Ambiguous identity or an auto-link target already bound elsewhere.
    /// Never silently resolved; surfaced as a blocking warning.
    #[error("conflict on {item}: {detail}")]
    Conflict { item: String, detail: String },

    /// A failure that aborted an operation before any mutation was attempted
    /// (e.g. pre-promotion snapshot creation).
    #[error("fatal failure in {operation}: {message}")]
    Fatal { operation: String, message: String },

    /// A mid-operation write failure that was rolled back; details are
    /// reported per item by the caller.
    #[error("partial failure in {operation}: {detail}")]
    Partial { operation: String, detail: String },

    /// Another pass holds the single-flight lock for this environment.
    #[error("environment '{environment}' is busy: {operation} already in progress")]
    Busy {
        environment: String,
        operation: String,
    },

    /// A referenced entity (environment, mapping, incident, registry entry)
    /// does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state-machine rule rejected the requested transition.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ReconcileError {
    fn from(err: sqlx::Error) -> Self {
        ReconcileError::Internal(err.into())
    }
}

impl ReconcileError {
    /// Whether a retry could succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Transient { .. } | ReconcileError::Busy { .. })
    }
}
