/// Environment persistence and lock-free registry
///
/// `EnvironmentStore` persists environment configuration and the derived
/// drift summary columns in the tenant database. `EnvironmentRegistry` keeps
/// a lock-free in-memory view (ArcSwap) hot-reloaded after every write, so
/// background loops read environments without touching the database.

use crate::drift::types::{AffectedItem, DriftStatus, DriftSummary};
use crate::tenant::database::TenantDatabaseManager;
use crate::tenant::types::{DriftSummaryState, Environment, RepositoryEndpoint, RuntimeEndpoint};
use anyhow::Result;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use std::sync::Arc;

/// SQLite-backed environment storage
#[derive(Debug, Clone)]
pub struct EnvironmentStore {
    pool: SqlitePool,
}

impl EnvironmentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the environments schema (safe to call repeatedly).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS environments (
                slug TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                runtime JSON NOT NULL,
                repository JSON,
                drift_status TEXT NOT NULL DEFAULT 'unknown',
                last_checked_at TEXT,
                last_known_status TEXT,
                drift_commit TEXT,
                drift_message TEXT,
                affected JSON NOT NULL DEFAULT '[]',
                active_incident_id TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create or update an environment's configuration.
    ///
    /// Only configuration fields are written here; drift summary columns are
    /// owned by the detector and the active incident back-reference by the
    /// incident manager.
    pub async fn upsert(&self, environment: &Environment) -> Result<()> {
        let runtime_json = serde_json::to_string(&environment.runtime)?;
        let repository_json = environment
            .repository
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO environments (slug, name, runtime, repository, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                name = excluded.name,
                runtime = excluded.runtime,
                repository = excluded.repository,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&environment.slug)
        .bind(&environment.name)
        .bind(&runtime_json)
        .bind(&repository_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve one environment by slug.
    pub async fn get(&self, slug: &str) -> Result<Option<Environment>> {
        let row = sqlx::query("SELECT * FROM environments WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_environment).transpose()
    }

    /// List all environments in the tenant.
    pub async fn list(&self) -> Result<Vec<Environment>> {
        let rows = sqlx::query("SELECT * FROM environments ORDER BY slug")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_environment).collect()
    }

    /// Persist a freshly computed drift summary.
    ///
    /// When the pass errored, the previous non-error aggregate is retained in
    /// `last_known_status` instead of being overwritten silently.
    pub async fn update_drift_summary(&self, summary: &DriftSummary) -> Result<()> {
        let affected_json = serde_json::to_string(&summary.affected)?;

        sqlx::query(
            r#"
            UPDATE environments SET
                drift_status = ?,
                last_checked_at = ?,
                last_known_status = ?,
                drift_commit = ?,
                drift_message = ?,
                affected = ?,
                updated_at = ?
            WHERE slug = ?
            "#,
        )
        .bind(summary.status.as_str())
        .bind(summary.checked_at.to_rfc3339())
        .bind(summary.last_known.map(|s| s.as_str()))
        .bind(&summary.commit)
        .bind(&summary.message)
        .bind(&affected_json)
        .bind(Utc::now().to_rfc3339())
        .bind(&summary.environment)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set or clear the active-incident back-reference.
    pub async fn set_active_incident(&self, slug: &str, incident_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE environments SET active_incident_id = ?, updated_at = ? WHERE slug = ?")
            .bind(incident_id)
            .bind(Utc::now().to_rfc3339())
            .bind(slug)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn row_to_environment(row: sqlx::sqlite::SqliteRow) -> Result<Environment> {
    let runtime_json: String = row.get("runtime");
    let runtime: RuntimeEndpoint = serde_json::from_str(&runtime_json)?;

    let repository: Option<RepositoryEndpoint> = row
        .get::<Option<String>, _>("repository")
        .map(|json| serde_json::from_str(&json))
        .transpose()?;

    let affected_json: String = row.get("affected");
    let affected: Vec<AffectedItem> = serde_json::from_str(&affected_json)?;

    let status_raw: String = row.get("drift_status");
    let status = DriftStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("Unknown drift status in store: {}", status_raw))?;

    let last_checked_at = row
        .get::<Option<String>, _>("last_checked_at")
        .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)))
        .transpose()?;

    let last_known = row
        .get::<Option<String>, _>("last_known_status")
        .and_then(|raw| DriftStatus::parse(&raw));

    Ok(Environment {
        slug: row.get("slug"),
        name: row.get("name"),
        runtime,
        repository,
        summary: DriftSummaryState {
            status,
            last_checked_at,
            last_known,
            commit: row.get("drift_commit"),
            affected,
            message: row.get("drift_message"),
        },
        active_incident_id: row.get("active_incident_id"),
    })
}

/// Lock-free environment registry for the background loops
///
/// Uses ArcSwap to swap the whole environment map atomically after writes,
/// so detection/sync passes read configuration without locking.
#[derive(Debug)]
pub struct EnvironmentRegistry {
    /// Key: "{tenant}/{slug}"
    environments: ArcSwap<HashMap<String, Environment>>,
    db: Arc<TenantDatabaseManager>,
    tenants: Vec<String>,
}

impl EnvironmentRegistry {
    pub fn new(db: Arc<TenantDatabaseManager>, tenants: Vec<String>) -> Self {
        Self {
            environments: ArcSwap::new(Arc::new(HashMap::new())),
            db,
            tenants,
        }
    }

    /// Populate the registry from storage for every configured tenant.
    pub async fn init_from_storage(&self) -> Result<()> {
        let mut map = HashMap::new();
        for tenant in &self.tenants {
            let pool = self.db.tenant_pool(tenant).await?;
            for environment in EnvironmentStore::new(pool).list().await? {
                map.insert(format!("{}/{}", tenant, environment.slug), environment);
            }
        }

        let count = map.len();
        self.environments.store(Arc::new(map));
        tracing::info!("Initialized environment registry with {} environments", count);

        Ok(())
    }

    /// Hot-reload one tenant's environments after a write.
    pub async fn reload_tenant(&self, tenant: &str) -> Result<()> {
        let pool = self.db.tenant_pool(tenant).await?;
        let fresh = EnvironmentStore::new(pool).list().await?;

        let current = self.environments.load();
        let prefix = format!("{}/", tenant);
        let mut next: HashMap<String, Environment> = current
            .iter()
            .filter(|(key, _)| !key.starts_with(&prefix))
            .map(|(key, env)| (key.clone(), env.clone()))
            .collect();
        for environment in fresh {
            next.insert(format!("{}/{}", tenant, environment.slug), environment);
        }

        self.environments.store(Arc::new(next));
        Ok(())
    }

    /// Lock-free environment lookup.
    pub fn get(&self, tenant: &str, slug: &str) -> Option<Environment> {
        self.environments
            .load()
            .get(&format!("{}/{}", tenant, slug))
            .cloned()
    }

    /// All environments for a tenant (used by the background loops).
    pub fn list(&self, tenant: &str) -> Vec<Environment> {
        let prefix = format!("{}/", tenant);
        let mut environments: Vec<Environment> = self
            .environments
            .load()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, env)| env.clone())
            .collect();
        environments.sort_by(|a, b| a.slug.cmp(&b.slug));
        environments
    }

    /// Tenants this registry serves.
    pub fn tenants(&self) -> &[String] {
        &self.tenants
    }
}
