/// Promotion REST API endpoint
///
/// Thin wrapper over the promotion executor; all the locking, planning and
/// rollback behavior lives there. A failed-and-rolled-back promotion still
/// returns 200 with the per-item outcomes so callers see exactly what
/// happened.

use crate::api::{ApiError, AppState};
use crate::promote::{PromotionRequest, PromotionResult};
use axum::{extract::{Path, State}, response::Json, routing::post, Router};

pub fn create_promotion_routes() -> Router<AppState> {
    Router::new().route("/api/{tenant}/promotions", post(execute_promotion))
}

/// POST /api/{tenant}/promotions
async fn execute_promotion(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(request): Json<PromotionRequest>,
) -> Result<Json<PromotionResult>, ApiError> {
    tracing::info!(
        "🚚 Promotion requested: {} -> {} ({} item(s)) by {}",
        request.source,
        request.target,
        request.selection.len(),
        request.actor
    );
    let result = state.promoter.promote(&tenant, &request).await?;
    Ok(Json(result))
}
