/// Incident lifecycle REST API endpoints
///
/// Read endpoints for the incident log and its artifact trail, plus the four
/// lifecycle transitions. The close endpoint is the only one with extra
/// machinery: before a reconciled incident may close, it re-runs detection
/// and verifies the affected items actually converged.

use crate::api::{ApiError, AppState};
use crate::drift::{
    run_detection, ArtifactStore, DriftIncident, DriftStatus, IncidentArtifact, IncidentStatus,
    IncidentStore, ResolutionKind,
};
use crate::error::ReconcileError;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListIncidentsQuery {
    pub environment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct StabilizeRequest {
    pub actor: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub actor: String,
    pub resolution: ResolutionKind,
    pub detail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    pub actor: String,
    /// Decision on file for this close; a close from `reconciled` keeps the
    /// resolution recorded at that transition instead
    pub resolution: ResolutionKind,
    /// Required when closing before the incident is reconciled
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactRequest {
    pub kind: String,
    pub reference: String,
    pub note: Option<String>,
    pub actor: Option<String>,
}

pub fn create_incident_routes() -> Router<AppState> {
    Router::new()
        .route("/api/{tenant}/incidents", get(list_incidents))
        .route("/api/{tenant}/incidents/{id}", get(get_incident))
        .route("/api/{tenant}/incidents/{id}/artifacts", get(list_artifacts))
        .route("/api/{tenant}/incidents/{id}/artifacts", post(append_artifact))
        .route("/api/{tenant}/incidents/{id}/acknowledge", post(acknowledge_incident))
        .route("/api/{tenant}/incidents/{id}/stabilize", post(stabilize_incident))
        .route("/api/{tenant}/incidents/{id}/reconcile", post(reconcile_incident))
        .route("/api/{tenant}/incidents/{id}/close", post(close_incident))
}

/// GET /api/{tenant}/incidents?environment=
async fn list_incidents(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(query): Query<ListIncidentsQuery>,
) -> Result<Json<Vec<DriftIncident>>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    let incidents = IncidentStore::new(pool)
        .list(query.environment.as_deref())
        .await?;
    Ok(Json(incidents))
}

/// GET /api/{tenant}/incidents/{id}
async fn get_incident(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<DriftIncident>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    IncidentStore::new(pool)
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ReconcileError::NotFound(format!("incident {}", id)).into())
}

/// GET /api/{tenant}/incidents/{id}/artifacts
async fn list_artifacts(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<Vec<IncidentArtifact>>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    let artifacts = ArtifactStore::new(pool).list_for_incident(&id).await?;
    Ok(Json(artifacts))
}

/// POST /api/{tenant}/incidents/{id}/artifacts
///
/// Attach a commit, deployment or note reference. The trail is append-only.
async fn append_artifact(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
    Json(payload): Json<ArtifactRequest>,
) -> Result<Json<IncidentArtifact>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    IncidentStore::new(pool.clone())
        .get(&id)
        .await?
        .ok_or_else(|| ReconcileError::NotFound(format!("incident {}", id)))?;

    let mut artifact = IncidentArtifact::new(&id, &payload.kind, &payload.reference);
    artifact.note = payload.note;
    artifact.created_by = payload.actor;
    ArtifactStore::new(pool).append(&artifact).await?;
    Ok(Json(artifact))
}

/// POST /api/{tenant}/incidents/{id}/acknowledge
async fn acknowledge_incident(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
    Json(payload): Json<ActorRequest>,
) -> Result<Json<DriftIncident>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    let incident = state
        .incidents
        .acknowledge(&pool, &tenant, &id, &payload.actor)
        .await?;
    Ok(Json(incident))
}

/// POST /api/{tenant}/incidents/{id}/stabilize
async fn stabilize_incident(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
    Json(payload): Json<StabilizeRequest>,
) -> Result<Json<DriftIncident>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    let incident = state
        .incidents
        .stabilize(&pool, &tenant, &id, &payload.actor, payload.note.as_deref())
        .await?;
    Ok(Json(incident))
}

/// POST /api/{tenant}/incidents/{id}/reconcile
async fn reconcile_incident(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
    Json(payload): Json<ReconcileRequest>,
) -> Result<Json<DriftIncident>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    let incident = state
        .incidents
        .reconcile(
            &pool,
            &tenant,
            &id,
            &payload.actor,
            payload.resolution,
            payload.detail.as_deref(),
        )
        .await?;
    Ok(Json(incident))
}

/// POST /api/{tenant}/incidents/{id}/close
///
/// A reconciled incident (except one resolved as `accept`) only closes after
/// a fresh detection pass confirms none of its affected items still diverge.
async fn close_incident(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
    Json(payload): Json<CloseRequest>,
) -> Result<Json<DriftIncident>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    let store = IncidentStore::new(pool.clone());
    let incident = store
        .get(&id)
        .await?
        .ok_or_else(|| ReconcileError::NotFound(format!("incident {}", id)))?;

    let verified_in_sync = if incident.status == IncidentStatus::Reconciled
        && incident.resolution != Some(ResolutionKind::Accept)
    {
        verify_converged(&state, &tenant, &incident).await?
    } else {
        false
    };

    let closed = state
        .incidents
        .close(
            &pool,
            &tenant,
            &id,
            &payload.actor,
            payload.resolution,
            payload.reason.as_deref(),
            verified_in_sync,
        )
        .await?;
    Ok(Json(closed))
}

/// Re-run detection on the incident's environment and check that none of its
/// affected runtime objects still appear in the fresh summary.
async fn verify_converged(
    state: &AppState,
    tenant: &str,
    incident: &DriftIncident,
) -> Result<bool, ApiError> {
    let (summary, _) = run_detection(
        &state.detector,
        &state.incidents,
        &state.db,
        tenant,
        &incident.environment,
    )
    .await?;

    if summary.status == DriftStatus::Error {
        return Ok(false);
    }

    let converged = incident.affected.iter().all(|item| {
        !summary
            .affected
            .iter()
            .any(|fresh| fresh.runtime_id == item.runtime_id)
    });
    Ok(converged)
}
