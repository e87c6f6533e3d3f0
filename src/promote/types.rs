/// Promotion domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to promote selected definitions from one environment to another.
#[derive(Debug, Clone, Deserialize)]
pub struct PromotionRequest {
    pub source: String,
    pub target: String,
    /// Registry ids to promote; each must have a live mapping in the source
    pub selection: Vec<String>,
    /// Incident this promotion resolves, if any; the promotion id is then
    /// appended to the incident as an artifact
    pub incident_id: Option<String>,
    pub actor: String,
}

/// Outcome of one selected item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Written to the target
    Applied,
    /// Target already matched the source content hash; no write issued
    Unchanged,
    /// This item failed: either during planning (e.g. no compatible target
    /// credential), which skips only this item, or during its write, which
    /// triggers the rollback
    Failed,
    /// Applied earlier in the pass, then restored by the rollback
    RolledBack,
    /// Never reached because an earlier item failed
    NotAttempted,
    /// Applied, but the rollback write for it also failed; the target needs
    /// manual repair from the pre-snapshot
    RollbackFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub registry_id: String,
    pub name: String,
    pub status: ItemStatus,
    /// Failure detail, when there is one
    pub detail: Option<String>,
}

/// Aggregate outcome of the promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    Succeeded,
    /// The pass completed and applied items stand, but some items failed
    /// planning and were skipped
    PartiallySucceeded,
    /// A write failed and every applied item was restored
    RolledBack,
    /// A write failed and at least one restore also failed
    RollbackFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionResult {
    pub id: String,
    pub source: String,
    pub target: String,
    pub status: PromotionStatus,
    pub items: Vec<ItemOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
