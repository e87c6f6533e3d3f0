/// Sync checkpoints
///
/// A sync pass records its progress (last processed runtime id, pinned
/// repository commit) after every batch, so an interrupted pass resumes
/// instead of restarting. Re-processing is harmless (every write is an
/// upsert); the checkpoint only saves work.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct SyncCheckpoint {
    pub environment: String,
    /// Last runtime id fully processed (runtime items are walked in id order)
    pub runtime_cursor: String,
    /// Repository commit the interrupted pass was pinned to; a resume is only
    /// valid against the same commit
    pub repo_commit: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed checkpoint storage, one row per environment
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_checkpoints (
                environment_slug TEXT PRIMARY KEY,
                runtime_cursor TEXT NOT NULL,
                repo_commit TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save(
        &self,
        environment: &str,
        runtime_cursor: &str,
        repo_commit: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (environment_slug, runtime_cursor, repo_commit, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(environment_slug) DO UPDATE SET
                runtime_cursor = excluded.runtime_cursor,
                repo_commit = excluded.repo_commit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(environment)
        .bind(runtime_cursor)
        .bind(repo_commit)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, environment: &str) -> Result<Option<SyncCheckpoint>> {
        let row = sqlx::query("SELECT * FROM sync_checkpoints WHERE environment_slug = ?")
            .bind(environment)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let updated_raw: String = row.get("updated_at");
            Ok(SyncCheckpoint {
                environment: row.get("environment_slug"),
                runtime_cursor: row.get("runtime_cursor"),
                repo_commit: row.get("repo_commit"),
                updated_at: DateTime::parse_from_rfc3339(&updated_raw)?.with_timezone(&Utc),
            })
        })
        .transpose()
    }

    /// Remove the checkpoint after a pass completes.
    pub async fn clear(&self, environment: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_checkpoints WHERE environment_slug = ?")
            .bind(environment)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::database::TenantDatabaseManager;
    use tempfile::TempDir;

    #[tokio::test]
    async fn checkpoints_upsert_and_clear() {
        let dir = TempDir::new().unwrap();
        let pool = TenantDatabaseManager::new(dir.path().to_string_lossy().to_string())
            .tenant_pool("default")
            .await
            .unwrap();
        let store = CheckpointStore::new(pool);

        store.save("prod", "rt-10", Some("c1")).await.unwrap();
        store.save("prod", "rt-20", Some("c1")).await.unwrap();

        let loaded = store.get("prod").await.unwrap().unwrap();
        assert_eq!(loaded.runtime_cursor, "rt-20");
        assert_eq!(loaded.repo_commit.as_deref(), Some("c1"));

        store.clear("prod").await.unwrap();
        assert!(store.get("prod").await.unwrap().is_none());
    }
}
