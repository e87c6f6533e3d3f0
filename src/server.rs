/// HTTP server setup and startup
///
/// Wires the tenant databases, the in-memory environment registry, the
/// adapters, the reconciliation components and the background scheduler into
/// a single axum application.

use crate::adapters::HttpAdapterFactory;
use crate::api::{
    create_environment_routes, create_event_routes, create_incident_routes,
    create_mapping_routes, create_promotion_routes, AppState,
};
use crate::config::Config;
use crate::drift::{DriftDetector, IncidentManager};
use crate::events::EventBus;
use crate::locks::EnvLockRegistry;
use crate::promote::PromotionExecutor;
use crate::sync::{ReconcileScheduler, SyncOrchestrator};
use crate::tenant::database::TenantDatabaseManager;
use crate::tenant::environments::EnvironmentRegistry;
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create the application router with all routes and background loops wired.
pub async fn create_app(config: Config) -> Result<Router> {
    let config = Arc::new(config);

    // Tenant databases live under {data_dir}/{tenant}/governance.db
    std::fs::create_dir_all(&config.database.data_dir)?;
    let db = Arc::new(TenantDatabaseManager::new(config.database.data_dir.clone()));

    // Open every configured tenant up front so schema problems surface at
    // startup, not on the first request.
    for tenant in &config.database.tenants {
        db.tenant_pool(tenant).await?;
    }
    tracing::info!("🗄️ Opened {} tenant database(s)", db.pool_count().await);

    let environments = Arc::new(EnvironmentRegistry::new(
        Arc::clone(&db),
        config.database.tenants.clone(),
    ));
    environments.init_from_storage().await?;

    let locks = EnvLockRegistry::new();
    let events = Arc::new(EventBus::new(256));
    let adapters: Arc<dyn crate::adapters::AdapterFactory> = Arc::new(HttpAdapterFactory::new());

    let detector = Arc::new(DriftDetector::new(
        Arc::clone(&db),
        Arc::clone(&environments),
        Arc::clone(&adapters),
        Arc::clone(&locks),
        config.retry,
    ));
    let incidents = Arc::new(IncidentManager::new(Arc::clone(&events), config.incidents));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::clone(&db),
        Arc::clone(&environments),
        Arc::clone(&adapters),
        Arc::clone(&locks),
        Arc::clone(&events),
        config.retry,
        config.sync,
    ));
    let promoter = Arc::new(PromotionExecutor::new(
        Arc::clone(&db),
        Arc::clone(&environments),
        Arc::clone(&adapters),
        Arc::clone(&locks),
        Arc::clone(&events),
        config.promotions,
    ));

    let scheduler = Arc::new(
        ReconcileScheduler::new(
            config.schedules.clone(),
            Arc::clone(&db),
            Arc::clone(&environments),
            Arc::clone(&orchestrator),
            Arc::clone(&detector),
            Arc::clone(&incidents),
        )
        .await?,
    );
    tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            tracing::error!("🔥 Scheduler failed to start: {}", e);
        }
    });

    let app_state = AppState {
        config,
        db,
        environments,
        adapters,
        detector,
        incidents,
        orchestrator,
        promoter,
        events,
    };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_environment_routes())
        .merge(create_mapping_routes())
        .merge(create_incident_routes())
        .merge(create_promotion_routes())
        .merge(create_event_routes())
        .with_state(app_state);

    Ok(app)
}

/// Start the server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config).await?;

    tracing::info!("✅ Driftway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
