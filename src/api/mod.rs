/// HTTP API layer
///
/// REST endpoints for the reconciliation engine, tenant-scoped under
/// /api/{tenant}/:
/// - environment configuration, on-demand sync and drift checks
/// - mapping inspection and operator actions (link/ignore/delete/onboard)
/// - incident lifecycle transitions
/// - promotions
/// - the live event stream (SSE)

pub mod environments;
pub mod events;
pub mod incidents;
pub mod mappings;
pub mod promotions;

pub use environments::create_environment_routes;
pub use events::create_event_routes;
pub use incidents::create_incident_routes;
pub use mappings::create_mapping_routes;
pub use promotions::create_promotion_routes;

use crate::adapters::AdapterFactory;
use crate::config::Config;
use crate::drift::{DriftDetector, IncidentManager};
use crate::error::ReconcileError;
use crate::events::EventBus;
use crate::promote::PromotionExecutor;
use crate::sync::SyncOrchestrator;
use crate::tenant::database::TenantDatabaseManager;
use crate::tenant::environments::EnvironmentRegistry;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<TenantDatabaseManager>,
    pub environments: Arc<EnvironmentRegistry>,
    pub adapters: Arc<dyn AdapterFactory>,
    pub detector: Arc<DriftDetector>,
    pub incidents: Arc<IncidentManager>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub promoter: Arc<PromotionExecutor>,
    pub events: Arc<EventBus>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Wrapper mapping the error taxonomy onto HTTP statuses.
pub struct ApiError(pub ReconcileError);

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        ApiError(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError(ReconcileError::Internal(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReconcileError::NotFound(_) => StatusCode::NOT_FOUND,
            ReconcileError::Busy { .. }
            | ReconcileError::Conflict { .. }
            | ReconcileError::InvalidTransition(_) => StatusCode::CONFLICT,
            ReconcileError::Configuration { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ReconcileError::Transient { .. } => StatusCode::BAD_GATEWAY,
            ReconcileError::Fatal { .. }
            | ReconcileError::Partial { .. }
            | ReconcileError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("🔥 Request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
