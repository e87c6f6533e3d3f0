/// Background reconciliation scheduler
///
/// Runs the three independent loops on their own cron schedules using
/// tokio-cron-scheduler: the sync pass, the drift detection pass, and the
/// incident TTL sweep. Each tick walks every configured tenant and its
/// environments; an environment busy under another pass is skipped and
/// retried on the next tick, never queued.

use crate::config::ScheduleConfig;
use crate::drift::{run_detection, DriftDetector, IncidentManager};
use crate::error::ReconcileError;
use crate::sync::orchestrator::SyncOrchestrator;
use crate::tenant::database::TenantDatabaseManager;
use crate::tenant::environments::EnvironmentRegistry;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct ReconcileScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// Job UUIDs by loop name, for shutdown bookkeeping
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    /// Last completed run per loop name, for the health endpoint
    last_runs: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    schedules: ScheduleConfig,
    db: Arc<TenantDatabaseManager>,
    environments: Arc<EnvironmentRegistry>,
    orchestrator: Arc<SyncOrchestrator>,
    detector: Arc<DriftDetector>,
    incidents: Arc<IncidentManager>,
}

impl ReconcileScheduler {
    pub async fn new(
        schedules: ScheduleConfig,
        db: Arc<TenantDatabaseManager>,
        environments: Arc<EnvironmentRegistry>,
        orchestrator: Arc<SyncOrchestrator>,
        detector: Arc<DriftDetector>,
        incidents: Arc<IncidentManager>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            last_runs: Arc::new(RwLock::new(HashMap::new())),
            schedules,
            db,
            environments,
            orchestrator,
            detector,
            incidents,
        })
    }

    /// Register the three loops and start ticking.
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting reconciliation scheduler");

        self.register_sync_loop().await?;
        self.register_drift_loop().await?;
        self.register_sweep_loop().await?;

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!("✅ Reconciliation scheduler started (3 loops)");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping reconciliation scheduler");

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.clear();
        }
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Reconciliation scheduler stopped");
        Ok(())
    }

    /// Last completed run per loop, for monitoring.
    pub async fn last_runs(&self) -> HashMap<String, DateTime<Utc>> {
        self.last_runs.read().await.clone()
    }

    async fn register_sync_loop(&self) -> Result<()> {
        let environments = Arc::clone(&self.environments);
        let orchestrator = Arc::clone(&self.orchestrator);
        let last_runs = Arc::clone(&self.last_runs);

        let job = Job::new_async(self.schedules.sync_cron.as_str(), move |_uuid, _l| {
            let environments = Arc::clone(&environments);
            let orchestrator = Arc::clone(&orchestrator);
            let last_runs = Arc::clone(&last_runs);

            Box::pin(async move {
                tracing::debug!("🔔 Sync loop tick");
                for tenant in environments.tenants().to_vec() {
                    for environment in environments.list(&tenant) {
                        match orchestrator.sync(&tenant, &environment.slug).await {
                            Ok(report) => {
                                tracing::debug!(
                                    "✅ Scheduled sync for {}/{}: {} linked, {} unmapped",
                                    tenant,
                                    environment.slug,
                                    report.linked,
                                    report.unmapped
                                );
                            }
                            Err(ReconcileError::Busy { .. }) => {
                                tracing::debug!(
                                    "⏭️ Skipping sync for busy environment {}/{}",
                                    tenant,
                                    environment.slug
                                );
                            }
                            Err(e) => {
                                tracing::error!(
                                    "🔥 Scheduled sync for {}/{} failed: {}",
                                    tenant,
                                    environment.slug,
                                    e
                                );
                            }
                        }
                    }
                }
                last_runs.write().await.insert("sync".to_string(), Utc::now());
            })
        })?;

        self.track_job("sync", job).await
    }

    async fn register_drift_loop(&self) -> Result<()> {
        let environments = Arc::clone(&self.environments);
        let detector = Arc::clone(&self.detector);
        let incidents = Arc::clone(&self.incidents);
        let db = Arc::clone(&self.db);
        let last_runs = Arc::clone(&self.last_runs);

        let job = Job::new_async(self.schedules.drift_cron.as_str(), move |_uuid, _l| {
            let environments = Arc::clone(&environments);
            let detector = Arc::clone(&detector);
            let incidents = Arc::clone(&incidents);
            let db = Arc::clone(&db);
            let last_runs = Arc::clone(&last_runs);

            Box::pin(async move {
                tracing::debug!("🔔 Drift loop tick");
                for tenant in environments.tenants().to_vec() {
                    for environment in environments.list(&tenant) {
                        match run_detection(&detector, &incidents, &db, &tenant, &environment.slug)
                            .await
                        {
                            Ok((summary, _)) => {
                                tracing::debug!(
                                    "✅ Scheduled drift check for {}/{}: {}",
                                    tenant,
                                    environment.slug,
                                    summary.status.as_str()
                                );
                            }
                            Err(ReconcileError::Busy { .. }) => {
                                tracing::debug!(
                                    "⏭️ Skipping drift check for busy environment {}/{}",
                                    tenant,
                                    environment.slug
                                );
                            }
                            Err(e) => {
                                tracing::error!(
                                    "🔥 Scheduled drift check for {}/{} failed: {}",
                                    tenant,
                                    environment.slug,
                                    e
                                );
                            }
                        }
                    }
                }
                last_runs.write().await.insert("drift".to_string(), Utc::now());
            })
        })?;

        self.track_job("drift", job).await
    }

    async fn register_sweep_loop(&self) -> Result<()> {
        let environments = Arc::clone(&self.environments);
        let incidents = Arc::clone(&self.incidents);
        let db = Arc::clone(&self.db);
        let last_runs = Arc::clone(&self.last_runs);

        let job = Job::new_async(self.schedules.sweep_cron.as_str(), move |_uuid, _l| {
            let environments = Arc::clone(&environments);
            let incidents = Arc::clone(&incidents);
            let db = Arc::clone(&db);
            let last_runs = Arc::clone(&last_runs);

            Box::pin(async move {
                tracing::debug!("🔔 Incident TTL sweep tick");
                for tenant in environments.tenants().to_vec() {
                    let pool = match db.tenant_pool(&tenant).await {
                        Ok(pool) => pool,
                        Err(e) => {
                            tracing::error!("🔥 Sweep could not open tenant {}: {}", tenant, e);
                            continue;
                        }
                    };
                    match incidents.sweep_expired(&pool, &tenant).await {
                        Ok(0) => {}
                        Ok(n) => {
                            tracing::warn!("⏰ {} incident(s) breached SLA in tenant {}", n, tenant)
                        }
                        Err(e) => {
                            tracing::error!("🔥 Incident sweep for tenant {} failed: {}", tenant, e)
                        }
                    }
                }
                last_runs.write().await.insert("sweep".to_string(), Utc::now());
            })
        })?;

        self.track_job("sweep", job).await
    }

    async fn track_job(&self, name: &str, job: Job) -> Result<()> {
        let uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };
        self.job_uuid_map.write().await.insert(name.to_string(), uuid);
        tracing::info!("📝 Registered {} loop", name);
        Ok(())
    }
}
