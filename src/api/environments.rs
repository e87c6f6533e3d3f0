/// Environment management REST API endpoints
///
/// Configuration CRUD plus the on-demand sync and drift-check triggers.
/// Configuration writes go to the tenant store and hot-reload the in-memory
/// registry; drift summaries are read from the registry without touching the
/// database.

use crate::api::{ApiError, AppState};
use crate::drift::{run_detection, DriftSummary};
use crate::error::ReconcileError;
use crate::sync::SyncReport;
use crate::tenant::environments::EnvironmentStore;
use crate::tenant::types::{Environment, RepositoryEndpoint, RuntimeEndpoint};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};

/// Request body for environment create/update.
#[derive(Debug, Deserialize)]
pub struct UpsertEnvironmentRequest {
    pub name: String,
    pub runtime: RuntimeEndpoint,
    pub repository: Option<RepositoryEndpoint>,
}

/// Request body for environment registration (slug in the body).
#[derive(Debug, Deserialize)]
pub struct RegisterEnvironmentRequest {
    pub slug: String,
    pub name: String,
    pub runtime: RuntimeEndpoint,
    pub repository: Option<RepositoryEndpoint>,
}

#[derive(Debug, Serialize)]
pub struct DriftCheckResponse {
    pub summary: DriftSummary,
    /// Incident opened or refreshed by this check, if drift was found
    pub incident_id: Option<String>,
}

pub fn create_environment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/{tenant}/environments", get(list_environments))
        .route("/api/{tenant}/environments", post(register_environment))
        .route("/api/{tenant}/environments/{slug}", get(get_environment))
        .route("/api/{tenant}/environments/{slug}", put(upsert_environment))
        .route("/api/{tenant}/environments/{slug}/drift", get(get_drift_summary))
        .route("/api/{tenant}/environments/{slug}/drift/check", post(check_drift))
        .route("/api/{tenant}/environments/{slug}/sync", post(sync_environment))
}

/// GET /api/{tenant}/environments
async fn list_environments(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Json<Vec<Environment>> {
    Json(state.environments.list(&tenant))
}

/// POST /api/{tenant}/environments
///
/// Registration form of the upsert, with the slug in the body. Rejected when
/// the slug is already registered; updates go through PUT.
async fn register_environment(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(payload): Json<RegisterEnvironmentRequest>,
) -> Result<Json<Environment>, ApiError> {
    if state.environments.get(&tenant, &payload.slug).is_some() {
        return Err(ReconcileError::Conflict {
            item: format!("environment {}/{}", tenant, payload.slug),
            detail: "already registered".to_string(),
        }
        .into());
    }

    let mut environment = Environment::new(&payload.slug, &payload.name, payload.runtime);
    environment.repository = payload.repository;

    let pool = state.db.tenant_pool(&tenant).await?;
    EnvironmentStore::new(pool).upsert(&environment).await?;
    state.environments.reload_tenant(&tenant).await?;

    tracing::info!("🆕 Environment {}/{} registered", tenant, payload.slug);
    state
        .environments
        .get(&tenant, &payload.slug)
        .map(Json)
        .ok_or_else(|| {
            ReconcileError::NotFound(format!("environment {}/{}", tenant, payload.slug)).into()
        })
}

/// GET /api/{tenant}/environments/{slug}
async fn get_environment(
    State(state): State<AppState>,
    Path((tenant, slug)): Path<(String, String)>,
) -> Result<Json<Environment>, ApiError> {
    state
        .environments
        .get(&tenant, &slug)
        .map(Json)
        .ok_or_else(|| ReconcileError::NotFound(format!("environment {}/{}", tenant, slug)).into())
}

/// PUT /api/{tenant}/environments/{slug}
///
/// Creates or updates configuration only; the drift summary and active
/// incident columns are owned by their respective components.
async fn upsert_environment(
    State(state): State<AppState>,
    Path((tenant, slug)): Path<(String, String)>,
    Json(payload): Json<UpsertEnvironmentRequest>,
) -> Result<Json<Environment>, ApiError> {
    let mut environment = Environment::new(&slug, &payload.name, payload.runtime);
    environment.repository = payload.repository;

    let pool = state.db.tenant_pool(&tenant).await?;
    EnvironmentStore::new(pool).upsert(&environment).await?;
    state.environments.reload_tenant(&tenant).await?;

    tracing::info!("📝 Environment {}/{} configured", tenant, slug);
    state
        .environments
        .get(&tenant, &slug)
        .map(Json)
        .ok_or_else(|| ReconcileError::NotFound(format!("environment {}/{}", tenant, slug)).into())
}

/// GET /api/{tenant}/environments/{slug}/drift
///
/// The persisted summary from the last detection pass; never triggers one.
async fn get_drift_summary(
    State(state): State<AppState>,
    Path((tenant, slug)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let environment = state
        .environments
        .get(&tenant, &slug)
        .ok_or_else(|| ReconcileError::NotFound(format!("environment {}/{}", tenant, slug)))?;

    Ok(Json(serde_json::json!({
        "environment": environment.slug,
        "summary": environment.summary,
        "active_incident_id": environment.active_incident_id,
    })))
}

/// POST /api/{tenant}/environments/{slug}/drift/check
///
/// Runs a full detection pass now, opening or refreshing an incident when
/// drift is found. 409 when the environment is busy under another pass.
async fn check_drift(
    State(state): State<AppState>,
    Path((tenant, slug)): Path<(String, String)>,
) -> Result<Json<DriftCheckResponse>, ApiError> {
    let (summary, incident) =
        run_detection(&state.detector, &state.incidents, &state.db, &tenant, &slug).await?;

    Ok(Json(DriftCheckResponse {
        summary,
        incident_id: incident.map(|i| i.id),
    }))
}

/// POST /api/{tenant}/environments/{slug}/sync
async fn sync_environment(
    State(state): State<AppState>,
    Path((tenant, slug)): Path<(String, String)>,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state.orchestrator.sync(&tenant, &slug).await?;
    Ok(Json(report))
}
