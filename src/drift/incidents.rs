/// Drift incident lifecycle
///
/// A detection pass that finds divergence opens (or refreshes) one incident
/// per environment. Incidents walk a strict state machine:
///
///   detected -> acknowledged -> stabilized -> reconciled -> closed
///
/// with early close allowed from every open state (reason required), and
/// `closed` terminal. Every transition is stamped with actor and time and
/// emits an event; resolution artifacts are append-only.

use crate::config::IncidentPolicy;
use crate::drift::types::{AffectedItem, DriftStatus, DriftSummary};
use crate::error::ReconcileError;
use crate::events::{EventBus, EventKind, ReconcileEvent};
use crate::tenant::environments::EnvironmentStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{sqlite::SqlitePool, Row};
use std::sync::Arc;
use uuid::Uuid;

/// Incident lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Detected,
    Acknowledged,
    Stabilized,
    Reconciled,
    Closed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Detected => "detected",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Stabilized => "stabilized",
            IncidentStatus::Reconciled => "reconciled",
            IncidentStatus::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "detected" => Some(IncidentStatus::Detected),
            "acknowledged" => Some(IncidentStatus::Acknowledged),
            "stabilized" => Some(IncidentStatus::Stabilized),
            "reconciled" => Some(IncidentStatus::Reconciled),
            "closed" => Some(IncidentStatus::Closed),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        *self != IncidentStatus::Closed
    }

    /// Whether `self -> next` is an allowed lifecycle step.
    ///
    /// Stages may not be skipped forward except to `closed`, and `closed`
    /// is terminal.
    pub fn allows(&self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (*self, next),
            (Detected, Acknowledged)
                | (Detected, Closed)
                | (Acknowledged, Stabilized)
                | (Acknowledged, Reconciled)
                | (Acknowledged, Closed)
                | (Stabilized, Reconciled)
                | (Stabilized, Closed)
                | (Reconciled, Closed)
        )
    }
}

/// How a reconciled incident was brought back in line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Runtime state was promoted into the repository
    Promote,
    /// Runtime was reverted to the repository version
    Revert,
    /// Both sides were replaced with a corrected definition
    Replace,
    /// Divergence accepted as-is, recorded without converging the hashes
    Accept,
}

impl ResolutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionKind::Promote => "promote",
            ResolutionKind::Revert => "revert",
            ResolutionKind::Replace => "replace",
            ResolutionKind::Accept => "accept",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "promote" => Some(ResolutionKind::Promote),
            "revert" => Some(ResolutionKind::Revert),
            "replace" => Some(ResolutionKind::Replace),
            "accept" => Some(ResolutionKind::Accept),
            _ => None,
        }
    }
}

/// One drift incident with its full transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftIncident {
    pub id: String,
    pub environment: String,
    pub status: IncidentStatus,
    /// Items diverging when the incident was opened or last refreshed
    pub affected: Vec<AffectedItem>,
    /// Repository commit the detection was pinned to
    pub commit: Option<String>,
    pub sla_breached: bool,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub stabilized_at: Option<DateTime<Utc>>,
    pub stabilized_by: Option<String>,
    pub stabilization_note: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub reconciled_by: Option<String>,
    pub resolution: Option<ResolutionKind>,
    pub resolution_detail: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub close_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DriftIncident {
    fn open(environment: &str, summary: &DriftSummary) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            environment: environment.to_string(),
            status: IncidentStatus::Detected,
            affected: summary.affected.clone(),
            commit: summary.commit.clone(),
            sla_breached: false,
            detected_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            stabilized_at: None,
            stabilized_by: None,
            stabilization_note: None,
            reconciled_at: None,
            reconciled_by: None,
            resolution: None,
            resolution_detail: None,
            closed_at: None,
            closed_by: None,
            close_reason: None,
            updated_at: now,
        }
    }
}

/// One append-only artifact attached to an incident (commit id, deployment
/// id, operator note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentArtifact {
    pub id: String,
    pub incident_id: String,
    /// "commit", "deployment", "promotion" or "note"
    pub kind: String,
    /// The external identifier the artifact points at
    pub reference: String,
    pub note: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IncidentArtifact {
    pub fn new(incident_id: &str, kind: &str, reference: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            incident_id: incident_id.to_string(),
            kind: kind.to_string(),
            reference: reference.to_string(),
            note: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }
}

/// SQLite-backed incident storage
#[derive(Debug, Clone)]
pub struct IncidentStore {
    pool: SqlitePool,
}

impl IncidentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the incidents schema (safe to call repeatedly).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                environment_slug TEXT NOT NULL,
                status TEXT NOT NULL,
                affected JSON NOT NULL DEFAULT '[]',
                commit_id TEXT,
                sla_breached INTEGER NOT NULL DEFAULT 0,
                detected_at TEXT NOT NULL,
                acknowledged_at TEXT,
                acknowledged_by TEXT,
                stabilized_at TEXT,
                stabilized_by TEXT,
                stabilization_note TEXT,
                reconciled_at TEXT,
                reconciled_by TEXT,
                resolution TEXT,
                resolution_detail TEXT,
                closed_at TEXT,
                closed_by TEXT,
                close_reason TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_incidents_env_status ON incidents(environment_slug, status)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert(&self, incident: &DriftIncident) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incidents
                (id, environment_slug, status, affected, commit_id, sla_breached,
                 detected_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&incident.id)
        .bind(&incident.environment)
        .bind(incident.status.as_str())
        .bind(serde_json::to_string(&incident.affected)?)
        .bind(&incident.commit)
        .bind(incident.sla_breached)
        .bind(incident.detected_at.to_rfc3339())
        .bind(incident.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the full transition state of one incident.
    pub async fn update(&self, incident: &DriftIncident) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE incidents SET
                status = ?,
                affected = ?,
                commit_id = ?,
                sla_breached = ?,
                acknowledged_at = ?, acknowledged_by = ?,
                stabilized_at = ?, stabilized_by = ?, stabilization_note = ?,
                reconciled_at = ?, reconciled_by = ?, resolution = ?, resolution_detail = ?,
                closed_at = ?, closed_by = ?, close_reason = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(incident.status.as_str())
        .bind(serde_json::to_string(&incident.affected)?)
        .bind(&incident.commit)
        .bind(incident.sla_breached)
        .bind(incident.acknowledged_at.map(|t| t.to_rfc3339()))
        .bind(&incident.acknowledged_by)
        .bind(incident.stabilized_at.map(|t| t.to_rfc3339()))
        .bind(&incident.stabilized_by)
        .bind(&incident.stabilization_note)
        .bind(incident.reconciled_at.map(|t| t.to_rfc3339()))
        .bind(&incident.reconciled_by)
        .bind(incident.resolution.map(|r| r.as_str()))
        .bind(&incident.resolution_detail)
        .bind(incident.closed_at.map(|t| t.to_rfc3339()))
        .bind(&incident.closed_by)
        .bind(&incident.close_reason)
        .bind(incident.updated_at.to_rfc3339())
        .bind(&incident.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<DriftIncident>> {
        let row = sqlx::query("SELECT * FROM incidents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_incident).transpose()
    }

    pub async fn list(&self, environment: Option<&str>) -> Result<Vec<DriftIncident>> {
        let rows = match environment {
            Some(slug) => {
                sqlx::query(
                    "SELECT * FROM incidents WHERE environment_slug = ? ORDER BY detected_at DESC",
                )
                .bind(slug)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM incidents ORDER BY detected_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(row_to_incident).collect()
    }

    /// The single open incident for an environment, if any.
    pub async fn active_for_environment(&self, slug: &str) -> Result<Option<DriftIncident>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM incidents
            WHERE environment_slug = ? AND status != 'closed'
            ORDER BY detected_at DESC
            LIMIT 1
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_incident).transpose()
    }

    /// Incidents closed in an environment since `cutoff`, newest first.
    pub async fn closed_since(
        &self,
        slug: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DriftIncident>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM incidents
            WHERE environment_slug = ? AND status = 'closed' AND closed_at >= ?
            ORDER BY closed_at DESC
            "#,
        )
        .bind(slug)
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_incident).collect()
    }

    /// Open incidents detected before `cutoff` and not yet marked breached.
    pub async fn open_past_ttl(&self, cutoff: DateTime<Utc>) -> Result<Vec<DriftIncident>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM incidents
            WHERE status != 'closed' AND sla_breached = 0 AND detected_at < ?
            ORDER BY detected_at
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_incident).collect()
    }
}

fn row_to_incident(row: sqlx::sqlite::SqliteRow) -> Result<DriftIncident> {
    let status_raw: String = row.get("status");
    let status = IncidentStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("Unknown incident status in store: {}", status_raw))?;

    let affected_json: String = row.get("affected");
    let affected: Vec<AffectedItem> = serde_json::from_str(&affected_json)?;

    let parse_ts = |raw: Option<String>| -> Result<Option<DateTime<Utc>>> {
        raw.map(|r| {
            DateTime::parse_from_rfc3339(&r)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(Into::into)
        })
        .transpose()
    };

    let detected_raw: String = row.get("detected_at");
    let updated_raw: String = row.get("updated_at");

    Ok(DriftIncident {
        id: row.get("id"),
        environment: row.get("environment_slug"),
        status,
        affected,
        commit: row.get("commit_id"),
        sla_breached: row.get("sla_breached"),
        detected_at: DateTime::parse_from_rfc3339(&detected_raw)?.with_timezone(&Utc),
        acknowledged_at: parse_ts(row.get("acknowledged_at"))?,
        acknowledged_by: row.get("acknowledged_by"),
        stabilized_at: parse_ts(row.get("stabilized_at"))?,
        stabilized_by: row.get("stabilized_by"),
        stabilization_note: row.get("stabilization_note"),
        reconciled_at: parse_ts(row.get("reconciled_at"))?,
        reconciled_by: row.get("reconciled_by"),
        resolution: row
            .get::<Option<String>, _>("resolution")
            .and_then(|r| ResolutionKind::parse(&r)),
        resolution_detail: row.get("resolution_detail"),
        closed_at: parse_ts(row.get("closed_at"))?,
        closed_by: row.get("closed_by"),
        close_reason: row.get("close_reason"),
        updated_at: DateTime::parse_from_rfc3339(&updated_raw)?.with_timezone(&Utc),
    })
}

/// Append-only storage for incident resolution artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    pool: SqlitePool,
}

impl ArtifactStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                incident_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                reference TEXT NOT NULL,
                note TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_artifacts_incident ON artifacts(incident_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append one artifact. There is deliberately no update or delete.
    pub async fn append(&self, artifact: &IncidentArtifact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (id, incident_id, kind, reference, note, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&artifact.id)
        .bind(&artifact.incident_id)
        .bind(&artifact.kind)
        .bind(&artifact.reference)
        .bind(&artifact.note)
        .bind(&artifact.created_by)
        .bind(artifact.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_for_incident(&self, incident_id: &str) -> Result<Vec<IncidentArtifact>> {
        let rows = sqlx::query(
            "SELECT * FROM artifacts WHERE incident_id = ? ORDER BY created_at",
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let created_raw: String = row.get("created_at");
                Ok(IncidentArtifact {
                    id: row.get("id"),
                    incident_id: row.get("incident_id"),
                    kind: row.get("kind"),
                    reference: row.get("reference"),
                    note: row.get("note"),
                    created_by: row.get("created_by"),
                    created_at: DateTime::parse_from_rfc3339(&created_raw)?.with_timezone(&Utc),
                })
            })
            .collect()
    }
}

/// Incident lifecycle manager
///
/// Owns incident creation (with duplicate suppression), the operator-driven
/// transitions, and the TTL sweep. Stateless across calls; all state lives
/// in the tenant database.
pub struct IncidentManager {
    events: Arc<EventBus>,
    policy: IncidentPolicy,
}

impl IncidentManager {
    pub fn new(events: Arc<EventBus>, policy: IncidentPolicy) -> Self {
        Self { events, policy }
    }

    /// React to a completed detection pass.
    ///
    /// Opens a new incident only when drift is present, no incident is open
    /// for the environment, and no recently closed incident covered an
    /// overlapping item set. An already open incident has its affected set
    /// refreshed in place.
    pub async fn handle_detection(
        &self,
        pool: &SqlitePool,
        tenant: &str,
        summary: &DriftSummary,
    ) -> Result<Option<DriftIncident>, ReconcileError> {
        if summary.status != DriftStatus::DriftDetected {
            return Ok(None);
        }

        let store = IncidentStore::new(pool.clone());

        if let Some(mut active) = store.active_for_environment(&summary.environment).await? {
            active.affected = summary.affected.clone();
            active.commit = summary.commit.clone();
            active.updated_at = Utc::now();
            store.update(&active).await?;
            tracing::info!(
                "📝 Refreshed active incident {} for {} ({} affected items)",
                active.id,
                summary.environment,
                active.affected.len()
            );
            return Ok(Some(active));
        }

        let cutoff = Utc::now() - Duration::hours(self.policy.dedupe_window_hours);
        for closed in store.closed_since(&summary.environment, cutoff).await? {
            if overlaps(&closed.affected, &summary.affected) {
                tracing::info!(
                    "⏳ Suppressing duplicate incident for {}: incident {} closed within the dedupe window covers overlapping items",
                    summary.environment,
                    closed.id
                );
                return Ok(None);
            }
        }

        let incident = DriftIncident::open(&summary.environment, summary);
        store.insert(&incident).await?;
        EnvironmentStore::new(pool.clone())
            .set_active_incident(&summary.environment, Some(&incident.id))
            .await?;

        tracing::warn!(
            "🆕 Opened drift incident {} for {} ({} affected items)",
            incident.id,
            summary.environment,
            incident.affected.len()
        );
        self.events.emit(ReconcileEvent::new(
            EventKind::DriftDetected,
            tenant,
            Some(&summary.environment),
            json!({
                "incident_id": incident.id,
                "commit": incident.commit,
                "affected": incident.affected,
            }),
        ));

        Ok(Some(incident))
    }

    pub async fn acknowledge(
        &self,
        pool: &SqlitePool,
        tenant: &str,
        id: &str,
        actor: &str,
    ) -> Result<DriftIncident, ReconcileError> {
        let store = IncidentStore::new(pool.clone());
        let mut incident = self.require_transition(&store, id, IncidentStatus::Acknowledged).await?;

        incident.status = IncidentStatus::Acknowledged;
        incident.acknowledged_at = Some(Utc::now());
        incident.acknowledged_by = Some(actor.to_string());
        incident.updated_at = Utc::now();
        store.update(&incident).await?;

        self.emit_transition(EventKind::IncidentAcknowledged, tenant, &incident, actor);
        Ok(incident)
    }

    pub async fn stabilize(
        &self,
        pool: &SqlitePool,
        tenant: &str,
        id: &str,
        actor: &str,
        note: Option<&str>,
    ) -> Result<DriftIncident, ReconcileError> {
        let store = IncidentStore::new(pool.clone());
        let mut incident = self.require_transition(&store, id, IncidentStatus::Stabilized).await?;

        incident.status = IncidentStatus::Stabilized;
        incident.stabilized_at = Some(Utc::now());
        incident.stabilized_by = Some(actor.to_string());
        incident.stabilization_note = note.map(str::to_string);
        incident.updated_at = Utc::now();
        store.update(&incident).await?;

        self.emit_transition(EventKind::IncidentStabilized, tenant, &incident, actor);
        Ok(incident)
    }

    /// Record the corrective action taken.
    ///
    /// Artifacts (commit ids, deployment ids) are appended separately by the
    /// executor that produced them.
    pub async fn reconcile(
        &self,
        pool: &SqlitePool,
        tenant: &str,
        id: &str,
        actor: &str,
        resolution: ResolutionKind,
        detail: Option<&str>,
    ) -> Result<DriftIncident, ReconcileError> {
        let store = IncidentStore::new(pool.clone());
        let mut incident = self.require_transition(&store, id, IncidentStatus::Reconciled).await?;

        incident.status = IncidentStatus::Reconciled;
        incident.reconciled_at = Some(Utc::now());
        incident.reconciled_by = Some(actor.to_string());
        incident.resolution = Some(resolution);
        incident.resolution_detail = detail.map(str::to_string);
        incident.updated_at = Utc::now();
        store.update(&incident).await?;

        self.emit_transition(EventKind::IncidentReconciled, tenant, &incident, actor);
        Ok(incident)
    }

    /// Close an incident.
    ///
    /// Every close records a resolution type; an incident never closes with
    /// no decision on file. A close from `reconciled` keeps the resolution
    /// recorded at that transition; closing earlier persists the one given
    /// here and requires an explicit reason. A reconciled incident
    /// additionally needs the affected hashes verified back in agreement
    /// (computed by the caller from a fresh detection pass) unless the
    /// recorded resolution was `accept`.
    pub async fn close(
        &self,
        pool: &SqlitePool,
        tenant: &str,
        id: &str,
        actor: &str,
        resolution: ResolutionKind,
        reason: Option<&str>,
        verified_in_sync: bool,
    ) -> Result<DriftIncident, ReconcileError> {
        let store = IncidentStore::new(pool.clone());
        let mut incident = self.require_transition(&store, id, IncidentStatus::Closed).await?;

        if incident.status != IncidentStatus::Reconciled {
            if reason.is_none() {
                return Err(ReconcileError::InvalidTransition(format!(
                    "closing incident {} from '{}' requires a reason",
                    id,
                    incident.status.as_str()
                )));
            }
            incident.resolution = Some(resolution);
        }
        if incident.status == IncidentStatus::Reconciled
            && !verified_in_sync
            && incident.resolution != Some(ResolutionKind::Accept)
        {
            return Err(ReconcileError::Conflict {
                item: format!("incident {}", id),
                detail: "affected items are still divergent; converge them or record an 'accept' resolution".to_string(),
            });
        }

        incident.status = IncidentStatus::Closed;
        incident.closed_at = Some(Utc::now());
        incident.closed_by = Some(actor.to_string());
        incident.close_reason = reason.map(str::to_string);
        incident.updated_at = Utc::now();
        store.update(&incident).await?;

        EnvironmentStore::new(pool.clone())
            .set_active_incident(&incident.environment, None)
            .await?;

        self.emit_transition(EventKind::IncidentClosed, tenant, &incident, actor);
        Ok(incident)
    }

    /// Mark open incidents past the SLA window as breached.
    ///
    /// The flag is set once per incident and the incident stays open; the
    /// sweep escalates, it never closes.
    pub async fn sweep_expired(
        &self,
        pool: &SqlitePool,
        tenant: &str,
    ) -> Result<usize, ReconcileError> {
        let store = IncidentStore::new(pool.clone());
        let cutoff = Utc::now() - Duration::hours(self.policy.ttl_hours);
        let expired = store.open_past_ttl(cutoff).await?;

        for incident in &expired {
            let mut breached = incident.clone();
            breached.sla_breached = true;
            breached.updated_at = Utc::now();
            store.update(&breached).await?;

            tracing::warn!(
                "⏰ Incident {} in {} breached the {}h SLA window",
                incident.id,
                incident.environment,
                self.policy.ttl_hours
            );
            self.events.emit(ReconcileEvent::new(
                EventKind::IncidentExpired,
                tenant,
                Some(&incident.environment),
                json!({
                    "incident_id": incident.id,
                    "status": incident.status.as_str(),
                    "detected_at": incident.detected_at,
                }),
            ));
        }

        Ok(expired.len())
    }

    async fn require_transition(
        &self,
        store: &IncidentStore,
        id: &str,
        next: IncidentStatus,
    ) -> Result<DriftIncident, ReconcileError> {
        let incident = store
            .get(id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("incident {}", id)))?;

        if !incident.status.allows(next) {
            return Err(ReconcileError::InvalidTransition(format!(
                "incident {} cannot go from '{}' to '{}'",
                id,
                incident.status.as_str(),
                next.as_str()
            )));
        }
        Ok(incident)
    }

    fn emit_transition(
        &self,
        kind: EventKind,
        tenant: &str,
        incident: &DriftIncident,
        actor: &str,
    ) {
        self.events.emit(ReconcileEvent::new(
            kind,
            tenant,
            Some(&incident.environment),
            json!({
                "incident_id": incident.id,
                "status": incident.status.as_str(),
                "actor": actor,
            }),
        ));
    }
}

/// Whether two affected sets share at least one runtime object.
fn overlaps(a: &[AffectedItem], b: &[AffectedItem]) -> bool {
    a.iter()
        .any(|item| b.iter().any(|other| other.runtime_id == item.runtime_id))
}
