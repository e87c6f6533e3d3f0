/// Promotion snapshots
///
/// Before a promotion mutates anything, the raw target-side definitions of
/// every selected item are captured; a matching snapshot is taken after the
/// writes. Snapshots store the definitions byte-for-byte as the runtime
/// returned them, so a rollback restores exactly what was there.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

/// Whether a snapshot was taken before or after the writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Pre,
    Post,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Pre => "pre",
            SnapshotKind::Post => "post",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionSnapshot {
    pub id: String,
    pub environment: String,
    pub promotion_id: String,
    pub kind: SnapshotKind,
    /// Raw definitions keyed by runtime id, exactly as fetched
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed snapshot storage
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                environment_slug TEXT NOT NULL,
                promotion_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                content JSON NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(promotion_id, kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record(
        &self,
        environment: &str,
        promotion_id: &str,
        kind: SnapshotKind,
        content: &Value,
    ) -> Result<PromotionSnapshot> {
        let snapshot = PromotionSnapshot {
            id: Uuid::new_v4().to_string(),
            environment: environment.to_string(),
            promotion_id: promotion_id.to_string(),
            kind,
            content: content.clone(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO snapshots (id, environment_slug, promotion_id, kind, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.environment)
        .bind(&snapshot.promotion_id)
        .bind(snapshot.kind.as_str())
        .bind(serde_json::to_string(&snapshot.content)?)
        .bind(snapshot.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(snapshot)
    }

    pub async fn get(
        &self,
        promotion_id: &str,
        kind: SnapshotKind,
    ) -> Result<Option<PromotionSnapshot>> {
        let row = sqlx::query("SELECT * FROM snapshots WHERE promotion_id = ? AND kind = ?")
            .bind(promotion_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let content_json: String = row.get("content");
            let created_raw: String = row.get("created_at");
            let kind_raw: String = row.get("kind");
            Ok(PromotionSnapshot {
                id: row.get("id"),
                environment: row.get("environment_slug"),
                promotion_id: row.get("promotion_id"),
                kind: if kind_raw == "pre" {
                    SnapshotKind::Pre
                } else {
                    SnapshotKind::Post
                },
                content: serde_json::from_str(&content_json)?,
                created_at: DateTime::parse_from_rfc3339(&created_raw)?.with_timezone(&Utc),
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::database::TenantDatabaseManager;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn snapshots_round_trip_by_promotion_and_kind() {
        let dir = TempDir::new().unwrap();
        let pool = TenantDatabaseManager::new(dir.path().to_string_lossy().to_string())
            .tenant_pool("default")
            .await
            .unwrap();
        let store = SnapshotStore::new(pool);

        let content = json!({ "rt-1": { "name": "orders", "nodes": [] } });
        store
            .record("prod", "promo-1", SnapshotKind::Pre, &content)
            .await
            .unwrap();

        let loaded = store.get("promo-1", SnapshotKind::Pre).await.unwrap().unwrap();
        assert_eq!(loaded.content, content);
        assert!(store.get("promo-1", SnapshotKind::Post).await.unwrap().is_none());
    }
}
