/// Tenant-scoped environment types
///
/// An environment is one installation of the external workflow runtime
/// (e.g. dev/staging/prod) plus the repository location its definitions are
/// governed against. Driftway stores only *references* to externally-owned
/// credentials: the runtime/repository tokens are named env vars, never the
/// secrets themselves.

use crate::drift::types::{AffectedItem, DriftStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection details for one runtime installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEndpoint {
    /// Base URL of the runtime REST API (e.g. "https://automation.acme.dev")
    pub base_url: String,
    /// Name of the env var holding the runtime API key (credential reference
    /// only; the secret itself is externally owned)
    pub api_key_env: String,
}

/// Repository location for the environment's source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryEndpoint {
    /// Base URL of the repository API (e.g. "https://api.github.com")
    pub base_url: String,
    /// Repository identifier ("org/name")
    pub repo: String,
    /// Branch the environment tracks
    pub branch: String,
    /// Root path of definition files inside the repository
    pub root: String,
    /// Name of the env var holding the repository token
    pub token_env: String,
}

/// Persisted drift summary columns on the environment row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSummaryState {
    pub status: DriftStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Last non-error aggregate, retained when the current status is `error`
    pub last_known: Option<DriftStatus>,
    pub commit: Option<String>,
    pub affected: Vec<AffectedItem>,
    pub message: Option<String>,
}

impl Default for DriftSummaryState {
    fn default() -> Self {
        Self {
            status: DriftStatus::Unknown,
            last_checked_at: None,
            last_known: None,
            commit: None,
            affected: Vec::new(),
            message: None,
        }
    }
}

/// One governed environment within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Stable slug, unique within the tenant (e.g. "prod")
    pub slug: String,
    /// Human-readable name
    pub name: String,
    pub runtime: RuntimeEndpoint,
    /// None until a repository is configured; drift stays `unknown` until then
    pub repository: Option<RepositoryEndpoint>,
    /// Derived drift summary (recomputed by the detector, never hand-edited)
    #[serde(default)]
    pub summary: DriftSummaryState,
    /// Back-reference to the active incident; lifecycle is owned by the
    /// incident manager, not the environment
    pub active_incident_id: Option<String>,
}

impl Environment {
    pub fn new(slug: &str, name: &str, runtime: RuntimeEndpoint) -> Self {
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            runtime,
            repository: None,
            summary: DriftSummaryState::default(),
            active_incident_id: None,
        }
    }
}
