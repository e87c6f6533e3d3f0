/// Registry entries - canonical workflow definitions
///
/// One entry per (tenant, registry-id), holding the latest repository-sourced
/// normalized definition, its content hash, and its repository location
/// (path/branch/commit). Entries are created on first repository ingestion or
/// explicit onboarding of an unmapped runtime object; they are never deleted,
/// only superseded in place so the registry id stays stable across edits.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

/// Canonical definition record for one logical workflow.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryEntry {
    /// Stable registry id (UUID minted at first ingestion)
    pub id: String,
    /// Definition name from the canonical tree
    pub name: String,
    /// Content hash of the normalized definition
    pub content_hash: String,
    /// Normalized definition tree
    pub definition: Value,
    /// Repository location; None for entries onboarded from the runtime
    /// before their first commit
    pub repo_path: Option<String>,
    pub repo_branch: Option<String>,
    pub repo_commit: Option<String>,
    /// How many times this entry has been superseded by a newer definition
    pub superseded_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed registry entry storage
#[derive(Debug, Clone)]
pub struct RegistryStore {
    pool: SqlitePool,
}

impl RegistryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the registry schema (safe to call repeatedly).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registry_entries (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                definition JSON NOT NULL,
                repo_path TEXT UNIQUE,
                repo_branch TEXT,
                repo_commit TEXT,
                superseded_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_registry_content_hash ON registry_entries(content_hash)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ingest one repository definition: create the entry on first sight of
    /// the path, supersede it in place when the content changed.
    pub async fn upsert_from_repository(
        &self,
        path: &str,
        branch: &str,
        commit: &str,
        name: &str,
        content_hash: &str,
        definition: &Value,
    ) -> Result<RegistryEntry> {
        let existing = self.get_by_path(path).await?;
        let now = Utc::now().to_rfc3339();

        match existing {
            Some(entry) => {
                let superseded = entry.content_hash != content_hash;
                sqlx::query(
                    r#"
                    UPDATE registry_entries SET
                        name = ?,
                        content_hash = ?,
                        definition = ?,
                        repo_branch = ?,
                        repo_commit = ?,
                        superseded_count = superseded_count + ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(name)
                .bind(content_hash)
                .bind(serde_json::to_string(definition)?)
                .bind(branch)
                .bind(commit)
                .bind(if superseded { 1 } else { 0 })
                .bind(&now)
                .bind(&entry.id)
                .execute(&self.pool)
                .await?;

                if superseded {
                    tracing::debug!("📝 Superseded registry entry {} ({})", entry.id, name);
                }
                self.get(&entry.id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("registry entry {} vanished after update", entry.id))
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO registry_entries
                        (id, name, content_hash, definition, repo_path, repo_branch, repo_commit,
                         superseded_count, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(name)
                .bind(content_hash)
                .bind(serde_json::to_string(definition)?)
                .bind(path)
                .bind(branch)
                .bind(commit)
                .bind(&now)
                .bind(&now)
                .execute(&self.pool)
                .await?;

                tracing::info!("🆕 Registry entry created for {} ({})", path, name);
                self.get(&id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("registry entry {} vanished after insert", id))
            }
        }
    }

    /// Explicitly onboard an unmapped runtime object as a new canonical
    /// definition (no repository location until its first commit).
    pub async fn onboard_from_runtime(
        &self,
        name: &str,
        content_hash: &str,
        definition: &Value,
    ) -> Result<RegistryEntry> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO registry_entries
                (id, name, content_hash, definition, repo_path, repo_branch, repo_commit,
                 superseded_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, NULL, NULL, NULL, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(content_hash)
        .bind(serde_json::to_string(definition)?)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!("🆕 Onboarded runtime definition '{}' as registry entry {}", name, id);
        self.get(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("registry entry {} vanished after insert", id))
    }

    pub async fn get(&self, id: &str) -> Result<Option<RegistryEntry>> {
        let row = sqlx::query("SELECT * FROM registry_entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_entry).transpose()
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Option<RegistryEntry>> {
        let row = sqlx::query("SELECT * FROM registry_entries WHERE repo_path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_entry).transpose()
    }

    /// All entries with the given content hash. More than one result is a
    /// hash ambiguity the identity resolver must surface, never auto-link.
    pub async fn find_by_hash(&self, content_hash: &str) -> Result<Vec<RegistryEntry>> {
        let rows = sqlx::query("SELECT * FROM registry_entries WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_entry).collect()
    }

    pub async fn list(&self) -> Result<Vec<RegistryEntry>> {
        let rows = sqlx::query("SELECT * FROM registry_entries ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: sqlx::sqlite::SqliteRow) -> Result<RegistryEntry> {
    let definition_json: String = row.get("definition");
    let created_raw: String = row.get("created_at");
    let updated_raw: String = row.get("updated_at");

    Ok(RegistryEntry {
        id: row.get("id"),
        name: row.get("name"),
        content_hash: row.get("content_hash"),
        definition: serde_json::from_str(&definition_json)?,
        repo_path: row.get("repo_path"),
        repo_branch: row.get("repo_branch"),
        repo_commit: row.get("repo_commit"),
        superseded_count: row.get("superseded_count"),
        created_at: DateTime::parse_from_rfc3339(&created_raw)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_raw)?.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::database::TenantDatabaseManager;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> RegistryStore {
        let pool = TenantDatabaseManager::new(dir.path().to_string_lossy().to_string())
            .tenant_pool("default")
            .await
            .unwrap();
        RegistryStore::new(pool)
    }

    #[tokio::test]
    async fn supersede_keeps_id_and_counts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let first = store
            .upsert_from_repository(
                "flows/a.json",
                "main",
                "c1",
                "flow-a",
                "hash-1",
                &json!({"name": "flow-a"}),
            )
            .await
            .unwrap();
        assert_eq!(first.superseded_count, 0);

        // Same hash at a newer commit: no supersession.
        let same = store
            .upsert_from_repository(
                "flows/a.json",
                "main",
                "c2",
                "flow-a",
                "hash-1",
                &json!({"name": "flow-a"}),
            )
            .await
            .unwrap();
        assert_eq!(same.id, first.id);
        assert_eq!(same.superseded_count, 0);
        assert_eq!(same.repo_commit.as_deref(), Some("c2"));

        // Changed content supersedes in place.
        let superseded = store
            .upsert_from_repository(
                "flows/a.json",
                "main",
                "c3",
                "flow-a",
                "hash-2",
                &json!({"name": "flow-a", "settings": {}}),
            )
            .await
            .unwrap();
        assert_eq!(superseded.id, first.id);
        assert_eq!(superseded.superseded_count, 1);
        assert_eq!(superseded.content_hash, "hash-2");
    }

    #[tokio::test]
    async fn find_by_hash_returns_all_matches() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        store
            .upsert_from_repository("flows/a.json", "main", "c1", "a", "dup", &json!({}))
            .await
            .unwrap();
        store
            .upsert_from_repository("flows/b.json", "main", "c1", "b", "dup", &json!({}))
            .await
            .unwrap();

        let matches = store.find_by_hash("dup").await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn onboarded_entries_have_no_repository_location() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let entry = store
            .onboard_from_runtime("adhoc", "hash-x", &json!({"name": "adhoc"}))
            .await
            .unwrap();
        assert!(entry.repo_path.is_none());
        assert!(store.get(&entry.id).await.unwrap().is_some());
    }
}
