/// SQLite persistence for mappings
///
/// All writes are upserts keyed by the (environment, runtime-id) unique
/// constraint, making retried writes safe. Rows are never hard-deleted;
/// `deleted` is a status, preserving the audit trail.

use crate::mapping::types::{Mapping, MappingStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};

/// SQLite-backed mapping storage
#[derive(Debug, Clone)]
pub struct MappingStore {
    pool: SqlitePool,
}

impl MappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the mappings schema (safe to call repeatedly).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mappings (
                environment_slug TEXT NOT NULL,
                runtime_id TEXT NOT NULL,
                registry_id TEXT,
                status TEXT NOT NULL,
                name TEXT,
                runtime_hash TEXT,
                repository_hash TEXT,
                runtime_updated_at TEXT,
                first_seen_at TEXT NOT NULL,
                last_synced_at TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(environment_slug, runtime_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mappings_env_status ON mappings(environment_slug, status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mappings_registry ON mappings(registry_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or update one mapping row atomically.
    pub async fn upsert(&self, mapping: &Mapping) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mappings
                (environment_slug, runtime_id, registry_id, status, name,
                 runtime_hash, repository_hash, runtime_updated_at,
                 first_seen_at, last_synced_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(environment_slug, runtime_id) DO UPDATE SET
                registry_id = excluded.registry_id,
                status = excluded.status,
                name = excluded.name,
                runtime_hash = excluded.runtime_hash,
                repository_hash = excluded.repository_hash,
                runtime_updated_at = excluded.runtime_updated_at,
                last_synced_at = excluded.last_synced_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&mapping.environment)
        .bind(&mapping.runtime_id)
        .bind(&mapping.registry_id)
        .bind(mapping.status.as_str())
        .bind(&mapping.name)
        .bind(&mapping.runtime_hash)
        .bind(&mapping.repository_hash)
        .bind(&mapping.runtime_updated_at)
        .bind(mapping.first_seen_at.to_rfc3339())
        .bind(mapping.last_synced_at.map(|t| t.to_rfc3339()))
        .bind(mapping.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve one mapping by its unique key.
    pub async fn get(&self, environment: &str, runtime_id: &str) -> Result<Option<Mapping>> {
        let row = sqlx::query(
            "SELECT * FROM mappings WHERE environment_slug = ? AND runtime_id = ?",
        )
        .bind(environment)
        .bind(runtime_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_mapping).transpose()
    }

    /// All mappings in an environment.
    pub async fn list_for_environment(&self, environment: &str) -> Result<Vec<Mapping>> {
        let rows = sqlx::query(
            "SELECT * FROM mappings WHERE environment_slug = ? ORDER BY runtime_id",
        )
        .bind(environment)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_mapping).collect()
    }

    /// Mappings with one status in an environment.
    pub async fn list_by_status(
        &self,
        environment: &str,
        status: MappingStatus,
    ) -> Result<Vec<Mapping>> {
        let rows = sqlx::query(
            "SELECT * FROM mappings WHERE environment_slug = ? AND status = ? ORDER BY runtime_id",
        )
        .bind(environment)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_mapping).collect()
    }

    /// The live mapping binding a registry entry in an environment, if any.
    ///
    /// "Live" means status `linked`: stale (`missing`) and opted-out rows do
    /// not block a new auto-link.
    pub async fn find_live_by_registry(
        &self,
        environment: &str,
        registry_id: &str,
    ) -> Result<Option<Mapping>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM mappings
            WHERE environment_slug = ? AND registry_id = ? AND status = 'linked'
            "#,
        )
        .bind(environment)
        .bind(registry_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_mapping).transpose()
    }
}

fn row_to_mapping(row: sqlx::sqlite::SqliteRow) -> Result<Mapping> {
    let status_raw: String = row.get("status");
    let status = MappingStatus::parse(&status_raw)
        .ok_or_else(|| anyhow::anyhow!("Unknown mapping status in store: {}", status_raw))?;

    let first_seen_raw: String = row.get("first_seen_at");
    let updated_raw: String = row.get("updated_at");
    let last_synced_at = row
        .get::<Option<String>, _>("last_synced_at")
        .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)))
        .transpose()?;

    Ok(Mapping {
        environment: row.get("environment_slug"),
        runtime_id: row.get("runtime_id"),
        registry_id: row.get("registry_id"),
        status,
        name: row.get("name"),
        runtime_hash: row.get("runtime_hash"),
        repository_hash: row.get("repository_hash"),
        runtime_updated_at: row.get("runtime_updated_at"),
        first_seen_at: DateTime::parse_from_rfc3339(&first_seen_raw)?.with_timezone(&Utc),
        last_synced_at,
        updated_at: DateTime::parse_from_rfc3339(&updated_raw)?.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::database::TenantDatabaseManager;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> MappingStore {
        let pool = TenantDatabaseManager::new(dir.path().to_string_lossy().to_string())
            .tenant_pool("default")
            .await
            .unwrap();
        MappingStore::new(pool)
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_the_unique_key() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let mut mapping = Mapping::new("prod", "rt-1", MappingStatus::Unmapped);
        store.upsert(&mapping).await.unwrap();

        mapping.status = MappingStatus::Linked;
        mapping.registry_id = Some("reg-1".to_string());
        mapping.runtime_hash = Some("h1".to_string());
        store.upsert(&mapping).await.unwrap();

        let rows = store.list_for_environment("prod").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, MappingStatus::Linked);
        assert_eq!(rows[0].registry_id.as_deref(), Some("reg-1"));
    }

    #[tokio::test]
    async fn live_lookup_skips_missing_rows() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let mut stale = Mapping::new("prod", "rt-old", MappingStatus::Missing);
        stale.registry_id = Some("reg-1".to_string());
        store.upsert(&stale).await.unwrap();

        assert!(store
            .find_live_by_registry("prod", "reg-1")
            .await
            .unwrap()
            .is_none());

        let mut live = Mapping::new("prod", "rt-new", MappingStatus::Linked);
        live.registry_id = Some("reg-1".to_string());
        store.upsert(&live).await.unwrap();

        let found = store.find_live_by_registry("prod", "reg-1").await.unwrap();
        assert_eq!(found.unwrap().runtime_id, "rt-new");
    }

    #[tokio::test]
    async fn status_listing_is_environment_scoped() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        store
            .upsert(&Mapping::new("prod", "rt-1", MappingStatus::Linked))
            .await
            .unwrap();
        store
            .upsert(&Mapping::new("staging", "rt-1", MappingStatus::Linked))
            .await
            .unwrap();

        let linked = store.list_by_status("prod", MappingStatus::Linked).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].environment, "prod");
    }
}
