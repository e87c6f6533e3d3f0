/// Drift detection and incident lifecycle
///
/// `DriftDetector` computes where runtime and repository diverge;
/// `IncidentManager` turns detections into governed incidents. They are
/// peers: the composition lives in `run_detection`, called by both the
/// scheduler and the on-demand API route.

pub mod detector;
pub mod incidents;
pub mod types;

pub use detector::DriftDetector;
pub use incidents::{
    ArtifactStore, DriftIncident, IncidentArtifact, IncidentManager, IncidentStatus,
    IncidentStore, ResolutionKind,
};
pub use types::{AffectedItem, DriftReason, DriftStatus, DriftSummary};

use crate::error::ReconcileError;
use crate::tenant::database::TenantDatabaseManager;
use std::sync::Arc;

/// One full detection pass: detect, then open/refresh the incident when
/// drift is present.
pub async fn run_detection(
    detector: &DriftDetector,
    incidents: &IncidentManager,
    db: &Arc<TenantDatabaseManager>,
    tenant: &str,
    slug: &str,
) -> Result<(DriftSummary, Option<DriftIncident>), ReconcileError> {
    let summary = detector.detect(tenant, slug).await?;
    let pool = db.tenant_pool(tenant).await?;
    let incident = incidents.handle_detection(&pool, tenant, &summary).await?;
    Ok((summary, incident))
}
