/// Drift domain types
///
/// Aggregate environment status, per-item drift reasons, and the derived
/// environment drift summary recomputed on every detection pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate drift status for one environment.
///
/// `Untracked` is an environment-level condition ("nothing is linked") and is
/// distinct from the per-item `unmapped` mapping status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    /// Repository location not configured; drift is not computed at all
    Unknown,
    /// No linked mappings exist in the environment
    Untracked,
    /// Every tracked item's runtime hash matches its repository hash
    InSync,
    /// At least one tracked item diverges or is absent from the repository
    DriftDetected,
    /// A fetch from runtime or repository failed; previous aggregate retained
    /// as last-known metadata
    Error,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::Unknown => "unknown",
            DriftStatus::Untracked => "untracked",
            DriftStatus::InSync => "in_sync",
            DriftStatus::DriftDetected => "drift_detected",
            DriftStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unknown" => Some(DriftStatus::Unknown),
            "untracked" => Some(DriftStatus::Untracked),
            "in_sync" => Some(DriftStatus::InSync),
            "drift_detected" => Some(DriftStatus::DriftDetected),
            "error" => Some(DriftStatus::Error),
            _ => None,
        }
    }
}

/// Why one tracked item counts as drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftReason {
    /// Runtime content hash differs from the repository content hash
    HashMismatch,
    /// The linked registry entry has no file at the pinned repository commit
    MissingFromRepository,
    /// The linked mapping's runtime object was not returned by the runtime
    MissingFromRuntime,
}

/// One drifted item inside an environment summary or incident snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedItem {
    pub runtime_id: String,
    pub registry_id: Option<String>,
    pub name: String,
    pub reason: DriftReason,
    pub runtime_hash: Option<String>,
    pub repository_hash: Option<String>,
}

/// Derived per-environment drift summary.
///
/// Recomputed on every detection pass and persisted on the environment row;
/// never hand-edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftSummary {
    pub environment: String,
    pub status: DriftStatus,
    pub checked_at: DateTime<Utc>,
    /// Previous aggregate, retained when the current pass errored
    pub last_known: Option<DriftStatus>,
    /// Repository commit the comparison was pinned to
    pub commit: Option<String>,
    pub affected: Vec<AffectedItem>,
    /// Specific failure description when status is `error`
    pub message: Option<String>,
}

impl DriftSummary {
    pub fn new(environment: &str, status: DriftStatus) -> Self {
        Self {
            environment: environment.to_string(),
            status,
            checked_at: Utc::now(),
            last_known: None,
            commit: None,
            affected: Vec::new(),
            message: None,
        }
    }
}
