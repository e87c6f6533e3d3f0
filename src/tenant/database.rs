/// Tenant database manager for isolated multi-tenant storage
///
/// Manages one SQLite governance database per tenant:
/// - {data_dir}/{tenant}/governance.db: environments, mappings, registry
///   entries, incidents, artifacts, snapshots, sync checkpoints
///
/// Connection pooling with lazy loading; no cross-tenant data leaks.

use crate::drift::incidents::{ArtifactStore, IncidentStore};
use crate::mapping::store::MappingStore;
use crate::promote::snapshots::SnapshotStore;
use crate::registry::RegistryStore;
use crate::sync::checkpoints::CheckpointStore;
use crate::tenant::environments::EnvironmentStore;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Tenant database manager with isolated connection pools
///
/// Lazy-loaded pools; scales to many tenants with minimal footprint.
#[derive(Debug)]
pub struct TenantDatabaseManager {
    /// Connection pools for tenant governance databases
    pools: RwLock<HashMap<String, SqlitePool>>,
    /// Base directory for database files
    data_dir: String,
}

impl TenantDatabaseManager {
    /// Create new tenant database manager
    pub fn new(data_dir: String) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            data_dir,
        }
    }

    /// Get or create the governance database pool for a tenant
    ///
    /// Creates the pool only on first access; uses the double-check pattern
    /// so concurrent first accesses build the pool once.
    pub async fn tenant_pool(&self, tenant: &str) -> Result<SqlitePool> {
        // Fast path for existing pools
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(tenant) {
                return Ok(pool.clone());
            }
        }

        let mut pools = self.pools.write().await;

        // Double-check: another task might have created it
        if let Some(pool) = pools.get(tenant) {
            return Ok(pool.clone());
        }

        let tenant_dir = Path::new(&self.data_dir).join(tenant);
        std::fs::create_dir_all(&tenant_dir).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create tenant directory '{}': {}",
                tenant_dir.display(),
                e
            )
        })?;
        let db_path = tenant_dir.join("governance.db");

        tracing::info!("🗄️ Creating tenant database pool: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        init_tenant_schema(&pool).await?;

        pools.insert(tenant.to_string(), pool.clone());

        tracing::info!("✅ Tenant database pool created: {}/governance.db", tenant);

        Ok(pool)
    }

    /// Number of open tenant pools, for monitoring
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }
}

/// Initialize the full governance schema for one tenant database.
///
/// Every store creates its own tables with IF NOT EXISTS, so this is safe to
/// call on every pool creation.
pub async fn init_tenant_schema(pool: &SqlitePool) -> Result<()> {
    EnvironmentStore::new(pool.clone()).init_schema().await?;
    MappingStore::new(pool.clone()).init_schema().await?;
    RegistryStore::new(pool.clone()).init_schema().await?;
    IncidentStore::new(pool.clone()).init_schema().await?;
    ArtifactStore::new(pool.clone()).init_schema().await?;
    SnapshotStore::new(pool.clone()).init_schema().await?;
    CheckpointStore::new(pool.clone()).init_schema().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn pools_are_created_lazily_and_cached() {
        let dir = TempDir::new().unwrap();
        let manager = TenantDatabaseManager::new(dir.path().to_string_lossy().to_string());

        assert_eq!(manager.pool_count().await, 0);

        let first = manager.tenant_pool("acme").await.unwrap();
        let second = manager.tenant_pool("acme").await.unwrap();
        assert_eq!(manager.pool_count().await, 1);

        // Same underlying pool
        drop(first);
        drop(second);

        manager.tenant_pool("globex").await.unwrap();
        assert_eq!(manager.pool_count().await, 2);
        assert!(dir.path().join("acme/governance.db").exists());
        assert!(dir.path().join("globex/governance.db").exists());
    }
}
