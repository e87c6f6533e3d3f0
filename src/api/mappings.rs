/// Mapping inspection and operator actions
///
/// Reads go straight to the mapping store. The write endpoints are the
/// explicit operator steps the sync pass never takes on its own: manual
/// linking, onboarding an unmapped object into the registry, opting out
/// (ignore), and soft deletion. Every status change flows through the
/// mapping state machine.

use crate::api::{ApiError, AppState};
use crate::error::ReconcileError;
use crate::mapping::{Mapping, MappingEvent, MappingStatus, MappingStore};
use crate::normalize::normalize;
use crate::registry::RegistryStore;
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListMappingsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManualLinkRequest {
    pub registry_id: String,
}

pub fn create_mapping_routes() -> Router<AppState> {
    Router::new()
        .route("/api/{tenant}/environments/{slug}/mappings", get(list_mappings))
        .route(
            "/api/{tenant}/environments/{slug}/mappings/{runtime_id}/link",
            post(link_mapping),
        )
        .route(
            "/api/{tenant}/environments/{slug}/mappings/{runtime_id}/onboard",
            post(onboard_mapping),
        )
        .route(
            "/api/{tenant}/environments/{slug}/mappings/{runtime_id}/ignore",
            post(ignore_mapping),
        )
        .route(
            "/api/{tenant}/environments/{slug}/mappings/{runtime_id}/delete",
            post(soft_delete_mapping),
        )
        .route("/api/{tenant}/registry", get(list_registry))
}

/// GET /api/{tenant}/environments/{slug}/mappings?status=
async fn list_mappings(
    State(state): State<AppState>,
    Path((tenant, slug)): Path<(String, String)>,
    Query(query): Query<ListMappingsQuery>,
) -> Result<Json<Vec<Mapping>>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    let store = MappingStore::new(pool);

    let mappings = match query.status.as_deref() {
        Some(raw) => {
            let status = MappingStatus::parse(raw).ok_or_else(|| {
                ReconcileError::NotFound(format!("mapping status '{}'", raw))
            })?;
            store.list_by_status(&slug, status).await?
        }
        None => store.list_for_environment(&slug).await?,
    };
    Ok(Json(mappings))
}

/// GET /api/{tenant}/registry
async fn list_registry(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<Vec<crate::registry::RegistryEntry>>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    Ok(Json(RegistryStore::new(pool).list().await?))
}

/// POST /api/{tenant}/environments/{slug}/mappings/{runtime_id}/link
///
/// Explicit operator link to a registry entry. Refused when the entry is
/// already live-linked to a different runtime object in this environment.
async fn link_mapping(
    State(state): State<AppState>,
    Path((tenant, slug, runtime_id)): Path<(String, String, String)>,
    Json(payload): Json<ManualLinkRequest>,
) -> Result<Json<Mapping>, ApiError> {
    let pool = state.db.tenant_pool(&tenant).await?;
    let mappings = MappingStore::new(pool.clone());
    let registry = RegistryStore::new(pool);

    let entry = registry
        .get(&payload.registry_id)
        .await?
        .ok_or_else(|| ReconcileError::NotFound(format!("registry entry {}", payload.registry_id)))?;

    if let Some(bound) = mappings.find_live_by_registry(&slug, &entry.id).await? {
        if bound.runtime_id != runtime_id {
            return Err(ReconcileError::Conflict {
                item: format!("registry entry {}", entry.id),
                detail: format!(
                    "already linked to runtime object '{}' in environment '{}'",
                    bound.runtime_id, slug
                ),
            }
            .into());
        }
    }

    let existing = mappings.get(&slug, &runtime_id).await?;
    let next = MappingStatus::transition(existing.as_ref().map(|m| m.status), MappingEvent::ManualLink)
        .map_err(|e| ReconcileError::InvalidTransition(e.to_string()))?;

    let mut mapping = existing.unwrap_or_else(|| Mapping::new(&slug, &runtime_id, next));
    mapping.status = next;
    mapping.registry_id = Some(entry.id);
    mapping.name = Some(entry.name);
    mapping.repository_hash = Some(entry.content_hash);
    mapping.updated_at = Utc::now();
    mappings.upsert(&mapping).await?;

    tracing::info!("🔗 Manual link: {}/{}/{}", tenant, slug, runtime_id);
    Ok(Json(mapping))
}

/// POST /api/{tenant}/environments/{slug}/mappings/{runtime_id}/onboard
///
/// Mint a registry identity for an unmapped runtime object from its current
/// definition, then link it. Onboarding is always this explicit step; the
/// sync pass never invents registry entries.
async fn onboard_mapping(
    State(state): State<AppState>,
    Path((tenant, slug, runtime_id)): Path<(String, String, String)>,
) -> Result<Json<Mapping>, ApiError> {
    let environment = state
        .environments
        .get(&tenant, &slug)
        .ok_or_else(|| ReconcileError::NotFound(format!("environment {}/{}", tenant, slug)))?;

    let pool = state.db.tenant_pool(&tenant).await?;
    let mappings = MappingStore::new(pool.clone());
    let registry = RegistryStore::new(pool);

    let existing = mappings.get(&slug, &runtime_id).await?;
    if let Some(mapping) = &existing {
        if mapping.registry_id.is_some() {
            return Err(ReconcileError::Conflict {
                item: format!("runtime object {}", runtime_id),
                detail: "already has a registry identity".to_string(),
            }
            .into());
        }
    }

    let adapter = state.adapters.runtime(&environment)?;
    let def = adapter
        .get_definition(&runtime_id)
        .await
        .map_err(|e| ReconcileError::NotFound(format!("runtime object {}: {}", runtime_id, e)))?;
    let normalized = normalize(&def.body)
        .map_err(|e| ReconcileError::Internal(anyhow::anyhow!("normalize: {}", e)))?;

    let entry = registry
        .onboard_from_runtime(&normalized.name, &normalized.content_hash, &normalized.tree)
        .await?;

    let next = MappingStatus::transition(existing.as_ref().map(|m| m.status), MappingEvent::ManualLink)
        .map_err(|e| ReconcileError::InvalidTransition(e.to_string()))?;
    let mut mapping = existing.unwrap_or_else(|| Mapping::new(&slug, &runtime_id, next));
    mapping.status = next;
    mapping.registry_id = Some(entry.id);
    mapping.name = Some(normalized.name);
    mapping.runtime_hash = Some(normalized.content_hash);
    mapping.updated_at = Utc::now();
    mappings.upsert(&mapping).await?;

    Ok(Json(mapping))
}

/// POST /api/{tenant}/environments/{slug}/mappings/{runtime_id}/ignore
async fn ignore_mapping(
    State(state): State<AppState>,
    Path((tenant, slug, runtime_id)): Path<(String, String, String)>,
) -> Result<Json<Mapping>, ApiError> {
    apply_optout(&state, &tenant, &slug, &runtime_id, MappingEvent::Ignore).await
}

/// POST /api/{tenant}/environments/{slug}/mappings/{runtime_id}/delete
///
/// Soft delete: the row is kept for the audit trail.
async fn soft_delete_mapping(
    State(state): State<AppState>,
    Path((tenant, slug, runtime_id)): Path<(String, String, String)>,
) -> Result<Json<Mapping>, ApiError> {
    apply_optout(&state, &tenant, &slug, &runtime_id, MappingEvent::SoftDelete).await
}

async fn apply_optout(
    state: &AppState,
    tenant: &str,
    slug: &str,
    runtime_id: &str,
    event: MappingEvent,
) -> Result<Json<Mapping>, ApiError> {
    let pool = state.db.tenant_pool(tenant).await?;
    let mappings = MappingStore::new(pool);

    let existing = mappings
        .get(slug, runtime_id)
        .await?
        .ok_or_else(|| ReconcileError::NotFound(format!("mapping {}/{}", slug, runtime_id)))?;

    let next = MappingStatus::transition(Some(existing.status), event)
        .map_err(|e| ReconcileError::InvalidTransition(e.to_string()))?;

    let mut mapping = existing;
    mapping.status = next;
    mapping.updated_at = Utc::now();
    mappings.upsert(&mapping).await?;
    Ok(Json(mapping))
}
