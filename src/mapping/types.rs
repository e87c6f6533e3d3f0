/// Mapping types and the status state machine
///
/// A mapping is the persisted link between a runtime object and a registry
/// identity within one environment. All status transitions flow through
/// `MappingStatus::transition`; writing the status field directly anywhere
/// else is forbidden so the precedence and transition rules live in exactly
/// one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mapping status.
///
/// Precedence when multiple conditions could apply simultaneously, highest
/// first: deleted > ignored > missing > unmapped > linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    /// Tracked: runtime object bound to a registry identity
    Linked,
    /// Exists in the runtime, no registry identity yet
    Unmapped,
    /// Was tracked, no longer present in the runtime
    Missing,
    /// Explicit opt-out from governance
    Ignored,
    /// Soft-deleted; preserved for the audit trail, never hard-deleted
    Deleted,
}

/// What happened to a runtime object, as observed by the sync pass or
/// requested by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingEvent {
    /// Seen in the runtime and resolved to a registry identity
    /// (explicit prior link or successful auto-link)
    ObservedLinked,
    /// Seen in the runtime with no registry identity (includes conflicts,
    /// which are surfaced separately and never auto-linked)
    ObservedUnmapped,
    /// Absent from the runtime listing
    Disappeared,
    /// Explicit operator link to a registry entry
    ManualLink,
    /// Explicit opt-out
    Ignore,
    /// Explicit soft delete
    SoftDelete,
}

#[derive(Debug, Error)]
#[error("mapping transition rejected: {from} does not accept {event}")]
pub struct TransitionError {
    pub from: &'static str,
    pub event: &'static str,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Linked => "linked",
            MappingStatus::Unmapped => "unmapped",
            MappingStatus::Missing => "missing",
            MappingStatus::Ignored => "ignored",
            MappingStatus::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "linked" => Some(MappingStatus::Linked),
            "unmapped" => Some(MappingStatus::Unmapped),
            "missing" => Some(MappingStatus::Missing),
            "ignored" => Some(MappingStatus::Ignored),
            "deleted" => Some(MappingStatus::Deleted),
            _ => None,
        }
    }

    /// Precedence rank, highest wins: deleted > ignored > missing > unmapped
    /// > linked.
    pub fn precedence(&self) -> u8 {
        match self {
            MappingStatus::Deleted => 4,
            MappingStatus::Ignored => 3,
            MappingStatus::Missing => 2,
            MappingStatus::Unmapped => 1,
            MappingStatus::Linked => 0,
        }
    }

    /// The single transition function for the mapping state machine.
    ///
    /// `current` is `None` for a runtime object seen for the first time.
    /// Rules:
    /// - `Ignore` and `SoftDelete` are accepted from any state.
    /// - `ignored`/`deleted` absorb automatic events: a sync pass never pulls
    ///   a row out of an explicit opt-out.
    /// - `missing` re-evaluates on reappearance (either observed event).
    /// - `unmapped` becomes `linked` only via `ObservedLinked` (successful
    ///   auto-link) or `ManualLink`; `linked` never silently degrades to
    ///   `unmapped`.
    pub fn transition(
        current: Option<MappingStatus>,
        event: MappingEvent,
    ) -> Result<MappingStatus, TransitionError> {
        use MappingEvent::*;
        use MappingStatus::*;

        let next = match (current, event) {
            (_, Ignore) => Ignored,
            (_, SoftDelete) => Deleted,

            // Explicit opt-outs absorb automatic observations.
            (Some(Ignored), ObservedLinked | ObservedUnmapped | Disappeared) => Ignored,
            (Some(Deleted), ObservedLinked | ObservedUnmapped | Disappeared) => Deleted,
            (Some(from @ (Ignored | Deleted)), ManualLink) => {
                return Err(TransitionError {
                    from: MappingStatus::as_str(&from),
                    event: "manual link",
                })
            }

            (None | Some(Linked | Unmapped | Missing), ObservedLinked) => Linked,
            (Some(Linked), ObservedUnmapped) => Linked,
            (None | Some(Unmapped | Missing), ObservedUnmapped) => Unmapped,

            (Some(Linked | Unmapped | Missing), Disappeared) => Missing,
            (None, Disappeared) => {
                return Err(TransitionError {
                    from: "nonexistent",
                    event: "disappeared",
                })
            }

            (None | Some(Linked | Unmapped | Missing), ManualLink) => Linked,
        };
        Ok(next)
    }
}

/// One row per (environment, runtime-id): the persisted link between a
/// runtime object and a registry identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub environment: String,
    pub runtime_id: String,
    pub registry_id: Option<String>,
    pub status: MappingStatus,
    /// Definition name as last seen, for operator-facing messages
    pub name: Option<String>,
    /// Content hash of the normalized runtime-side definition
    pub runtime_hash: Option<String>,
    /// Content hash of the normalized repository-side definition
    pub repository_hash: Option<String>,
    /// Runtime-reported last-modified marker, used only as a short-circuit
    /// hint (never correctness-critical)
    pub runtime_updated_at: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    /// A fresh row for a runtime object seen for the first time.
    pub fn new(environment: &str, runtime_id: &str, status: MappingStatus) -> Self {
        let now = Utc::now();
        Self {
            environment: environment.to_string(),
            runtime_id: runtime_id.to_string(),
            registry_id: None,
            status,
            name: None,
            runtime_hash: None,
            repository_hash: None,
            runtime_updated_at: None,
            first_seen_at: now,
            last_synced_at: None,
            updated_at: now,
        }
    }
}
