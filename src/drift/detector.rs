/// Drift detection
///
/// Compares every tracked (linked) runtime object against the repository
/// version at a single pinned commit, classifies divergence per item, and
/// persists the derived environment summary. Detection is read-only towards
/// the runtime and the repository; only mappings and the summary are written.

use crate::adapters::{with_retry, AdapterFactory, RuntimeDefinition};
use crate::config::RetryPolicy;
use crate::drift::types::{AffectedItem, DriftReason, DriftStatus, DriftSummary};
use crate::error::ReconcileError;
use crate::locks::EnvLockRegistry;
use crate::mapping::{Mapping, MappingEvent, MappingStatus, MappingStore};
use crate::normalize::normalize;
use crate::registry::RegistryStore;
use crate::tenant::database::TenantDatabaseManager;
use crate::tenant::environments::{EnvironmentRegistry, EnvironmentStore};
use crate::tenant::types::Environment;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

/// Repository state at one pinned commit: path -> content hash.
struct RepositorySnapshot {
    commit: String,
    hashes: HashMap<String, String>,
}

pub struct DriftDetector {
    db: Arc<TenantDatabaseManager>,
    environments: Arc<EnvironmentRegistry>,
    adapters: Arc<dyn AdapterFactory>,
    locks: Arc<EnvLockRegistry>,
    retry: RetryPolicy,
}

impl DriftDetector {
    pub fn new(
        db: Arc<TenantDatabaseManager>,
        environments: Arc<EnvironmentRegistry>,
        adapters: Arc<dyn AdapterFactory>,
        locks: Arc<EnvLockRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db,
            environments,
            adapters,
            locks,
            retry,
        }
    }

    /// Run one detection pass for an environment and persist its summary.
    ///
    /// Rejected with `Busy` when another pass (sync, promotion, detection)
    /// holds the environment; callers retry on the next schedule tick.
    pub async fn detect(&self, tenant: &str, slug: &str) -> Result<DriftSummary, ReconcileError> {
        let environment = self
            .environments
            .get(tenant, slug)
            .ok_or_else(|| ReconcileError::NotFound(format!("environment {}/{}", tenant, slug)))?;

        let _guard = self
            .locks
            .try_acquire(tenant, slug, "drift detection")
            .ok_or_else(|| ReconcileError::Busy {
                environment: slug.to_string(),
                operation: "drift detection".to_string(),
            })?;

        let pool = self.db.tenant_pool(tenant).await?;
        let summary = self.compute(&pool, &environment).await?;

        tracing::info!(
            "🔎 Drift check for {}/{}: {} ({} affected)",
            tenant,
            slug,
            summary.status.as_str(),
            summary.affected.len()
        );

        EnvironmentStore::new(pool).update_drift_summary(&summary).await?;
        self.environments.reload_tenant(tenant).await?;

        Ok(summary)
    }

    async fn compute(
        &self,
        pool: &SqlitePool,
        environment: &Environment,
    ) -> Result<DriftSummary, ReconcileError> {
        let slug = environment.slug.as_str();

        // Without a repository there is no source of truth to compare against.
        if environment.repository.is_none() {
            return Ok(DriftSummary::new(slug, DriftStatus::Unknown));
        }

        let mappings = MappingStore::new(pool.clone());
        let tracked = mappings.list_by_status(slug, MappingStatus::Linked).await?;
        if tracked.is_empty() {
            // Environment-level condition, distinct from per-item `unmapped`.
            return Ok(DriftSummary::new(slug, DriftStatus::Untracked));
        }

        let runtime_defs = match self.fetch_runtime(environment).await {
            Ok(defs) => defs,
            Err(message) => return Ok(error_summary(environment, &message)),
        };
        let repository = match self.fetch_repository(environment).await {
            Ok(snapshot) => snapshot,
            Err(message) => return Ok(error_summary(environment, &message)),
        };

        let by_runtime_id: HashMap<&str, &RuntimeDefinition> = runtime_defs
            .iter()
            .map(|def| (def.id.as_str(), def))
            .collect();
        let registry = RegistryStore::new(pool.clone());

        let mut affected = Vec::new();
        for mapping in &tracked {
            match self
                .compare_item(&registry, mapping, &by_runtime_id, &repository)
                .await?
            {
                ItemState::InSync { runtime_hash } => {
                    self.record_hashes(&mappings, mapping, Some(runtime_hash), None)
                        .await?;
                }
                ItemState::Drifted { item, runtime_hash } => {
                    self.record_hashes(&mappings, mapping, runtime_hash, item.repository_hash.clone())
                        .await?;
                    affected.push(item);
                }
                ItemState::Gone { item } => {
                    self.record_disappearance(&mappings, mapping).await?;
                    affected.push(item);
                }
            }
        }

        let mut summary = DriftSummary::new(
            slug,
            if affected.is_empty() {
                DriftStatus::InSync
            } else {
                DriftStatus::DriftDetected
            },
        );
        summary.commit = Some(repository.commit);
        summary.affected = affected;
        Ok(summary)
    }

    async fn compare_item(
        &self,
        registry: &RegistryStore,
        mapping: &Mapping,
        runtime_defs: &HashMap<&str, &RuntimeDefinition>,
        repository: &RepositorySnapshot,
    ) -> Result<ItemState, ReconcileError> {
        let name = mapping.name.clone().unwrap_or_else(|| mapping.runtime_id.clone());

        let Some(def) = runtime_defs.get(mapping.runtime_id.as_str()) else {
            return Ok(ItemState::Gone {
                item: AffectedItem {
                    runtime_id: mapping.runtime_id.clone(),
                    registry_id: mapping.registry_id.clone(),
                    name,
                    reason: DriftReason::MissingFromRuntime,
                    runtime_hash: None,
                    repository_hash: mapping.repository_hash.clone(),
                },
            });
        };

        let runtime_hash = match normalize(&def.body) {
            Ok(normalized) => Some(normalized.content_hash),
            Err(err) => {
                tracing::warn!(
                    "⚠️ Runtime definition {} in {} failed to normalize: {}",
                    mapping.runtime_id,
                    mapping.environment,
                    err
                );
                None
            }
        };

        // Repository side: the linked registry entry's file at the pinned commit.
        let repo_path = match &mapping.registry_id {
            Some(registry_id) => registry.get(registry_id).await?.and_then(|e| e.repo_path),
            None => None,
        };
        let repository_hash = repo_path.and_then(|path| repository.hashes.get(&path).cloned());

        let Some(repository_hash) = repository_hash else {
            return Ok(ItemState::Drifted {
                item: AffectedItem {
                    runtime_id: mapping.runtime_id.clone(),
                    registry_id: mapping.registry_id.clone(),
                    name,
                    reason: DriftReason::MissingFromRepository,
                    runtime_hash: runtime_hash.clone(),
                    repository_hash: None,
                },
                runtime_hash,
            });
        };

        if runtime_hash.as_deref() == Some(repository_hash.as_str()) {
            return Ok(ItemState::InSync {
                runtime_hash: repository_hash,
            });
        }

        Ok(ItemState::Drifted {
            item: AffectedItem {
                runtime_id: mapping.runtime_id.clone(),
                registry_id: mapping.registry_id.clone(),
                name,
                reason: DriftReason::HashMismatch,
                runtime_hash: runtime_hash.clone(),
                repository_hash: Some(repository_hash),
            },
            runtime_hash,
        })
    }

    async fn fetch_runtime(
        &self,
        environment: &Environment,
    ) -> Result<Vec<RuntimeDefinition>, String> {
        let adapter = self
            .adapters
            .runtime(environment)
            .map_err(|e| e.to_string())?;
        with_retry(&self.retry, "list runtime definitions", || {
            adapter.list_definitions()
        })
        .await
        .map_err(|e| e.to_string())
    }

    /// Resolve the branch head once and read everything at that commit, so
    /// the whole pass compares against a single repository state.
    async fn fetch_repository(
        &self,
        environment: &Environment,
    ) -> Result<RepositorySnapshot, String> {
        let repo_cfg = environment
            .repository
            .as_ref()
            .ok_or_else(|| "repository not configured".to_string())?;
        let client = self
            .adapters
            .repository(environment)
            .map_err(|e| e.to_string())?;

        let commit = with_retry(&self.retry, "resolve branch head", || {
            client.resolve_branch_head(&repo_cfg.branch)
        })
        .await
        .map_err(|e| e.to_string())?;

        let paths = with_retry(&self.retry, "list repository files", || {
            client.list_files(&repo_cfg.root, &commit)
        })
        .await
        .map_err(|e| e.to_string())?;

        let mut hashes = HashMap::new();
        for path in paths {
            let content = with_retry(&self.retry, "read repository file", || {
                client.read_file(&path, &commit)
            })
            .await
            .map_err(|e| e.to_string())?;

            match serde_json::from_str::<serde_json::Value>(&content)
                .map_err(|e| e.to_string())
                .and_then(|raw| normalize(&raw).map_err(|e| e.to_string()))
            {
                Ok(normalized) => {
                    hashes.insert(path, normalized.content_hash);
                }
                Err(err) => {
                    tracing::warn!("⚠️ Skipping malformed repository file {}: {}", path, err);
                }
            }
        }

        Ok(RepositorySnapshot { commit, hashes })
    }

    async fn record_hashes(
        &self,
        mappings: &MappingStore,
        mapping: &Mapping,
        runtime_hash: Option<String>,
        repository_hash: Option<String>,
    ) -> Result<(), ReconcileError> {
        let mut updated = mapping.clone();
        if runtime_hash.is_some() {
            updated.runtime_hash = runtime_hash;
        }
        if repository_hash.is_some() {
            updated.repository_hash = repository_hash;
        }
        updated.updated_at = Utc::now();
        mappings.upsert(&updated).await?;
        Ok(())
    }

    async fn record_disappearance(
        &self,
        mappings: &MappingStore,
        mapping: &Mapping,
    ) -> Result<(), ReconcileError> {
        let next = MappingStatus::transition(Some(mapping.status), MappingEvent::Disappeared)
            .map_err(|e| ReconcileError::InvalidTransition(e.to_string()))?;

        let mut updated = mapping.clone();
        updated.status = next;
        updated.updated_at = Utc::now();
        mappings.upsert(&updated).await?;
        Ok(())
    }
}

enum ItemState {
    InSync {
        runtime_hash: String,
    },
    Drifted {
        item: AffectedItem,
        /// Fresh runtime hash to persist on the mapping (None when the
        /// runtime body failed to normalize)
        runtime_hash: Option<String>,
    },
    Gone {
        item: AffectedItem,
    },
}

/// Build an `error` summary that keeps the previous aggregate visible
/// instead of silently overwriting it.
fn error_summary(environment: &Environment, message: &str) -> DriftSummary {
    let previous = &environment.summary;
    let mut summary = DriftSummary::new(&environment.slug, DriftStatus::Error);
    summary.last_known = if previous.status == DriftStatus::Error {
        previous.last_known
    } else {
        Some(previous.status)
    };
    summary.commit = previous.commit.clone();
    summary.message = Some(message.to_string());
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockAdapterFactory, MockRepository, MockRuntime};
    use serde_json::json;
    use tempfile::TempDir;

    fn definition(name: &str, url: &str) -> serde_json::Value {
        json!({
            "name": name,
            "nodes": [
                { "name": "fetch", "type": "httpRequest", "parameters": { "url": url } }
            ],
            "connections": {},
            "settings": {},
        })
    }

    struct Fixture {
        db: Arc<TenantDatabaseManager>,
        environments: Arc<EnvironmentRegistry>,
        runtime: Arc<MockRuntime>,
        repository: Arc<MockRepository>,
        detector: DriftDetector,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(TenantDatabaseManager::new(
            dir.path().to_string_lossy().to_string(),
        ));
        let pool = db.tenant_pool("default").await.unwrap();

        let mut environment = Environment::new(
            "prod",
            "Production",
            crate::tenant::types::RuntimeEndpoint {
                base_url: "https://runtime.example.test".to_string(),
                api_key_env: "RUNTIME_API_KEY".to_string(),
            },
        );
        environment.repository = Some(crate::tenant::types::RepositoryEndpoint {
            base_url: "https://api.github.example".to_string(),
            repo: "acme/flows".to_string(),
            branch: "main".to_string(),
            root: "flows".to_string(),
            token_env: "REPO_TOKEN".to_string(),
        });
        EnvironmentStore::new(pool.clone()).upsert(&environment).await.unwrap();

        let environments = Arc::new(EnvironmentRegistry::new(
            Arc::clone(&db),
            vec!["default".to_string()],
        ));
        environments.init_from_storage().await.unwrap();

        let runtime = MockRuntime::new();
        let repository = MockRepository::new("c1");
        let adapters = Arc::new(
            MockAdapterFactory::new()
                .with_runtime("prod", Arc::clone(&runtime))
                .with_repository("prod", Arc::clone(&repository)),
        );

        let detector = DriftDetector::new(
            Arc::clone(&db),
            Arc::clone(&environments),
            adapters,
            EnvLockRegistry::new(),
            RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
            },
        );

        Fixture {
            db,
            environments,
            runtime,
            repository,
            detector,
            _dir: dir,
        }
    }

    async fn link(fixture: &Fixture, runtime_id: &str, path: &str, body: &serde_json::Value) {
        let pool = fixture.db.tenant_pool("default").await.unwrap();
        let normalized = normalize(body).unwrap();
        let entry = RegistryStore::new(pool.clone())
            .upsert_from_repository(
                path,
                "main",
                "c1",
                &normalized.name,
                &normalized.content_hash,
                &normalized.tree,
            )
            .await
            .unwrap();

        let mut mapping = Mapping::new("prod", runtime_id, MappingStatus::Linked);
        mapping.registry_id = Some(entry.id);
        mapping.name = Some(normalized.name);
        MappingStore::new(pool).upsert(&mapping).await.unwrap();
    }

    #[tokio::test]
    async fn unconfigured_repository_reports_unknown() {
        let fixture = fixture().await;
        let pool = fixture.db.tenant_pool("default").await.unwrap();

        let bare = Environment::new(
            "dev",
            "Dev",
            crate::tenant::types::RuntimeEndpoint {
                base_url: "https://dev.example.test".to_string(),
                api_key_env: "RUNTIME_API_KEY".to_string(),
            },
        );
        EnvironmentStore::new(pool).upsert(&bare).await.unwrap();
        fixture.environments.reload_tenant("default").await.unwrap();

        let summary = fixture.detector.detect("default", "dev").await.unwrap();
        assert_eq!(summary.status, DriftStatus::Unknown);
    }

    #[tokio::test]
    async fn no_linked_mappings_reports_untracked() {
        let fixture = fixture().await;
        let summary = fixture.detector.detect("default", "prod").await.unwrap();
        assert_eq!(summary.status, DriftStatus::Untracked);
        assert!(summary.affected.is_empty());
    }

    #[tokio::test]
    async fn matching_hashes_report_in_sync() {
        let fixture = fixture().await;
        let body = definition("orders", "https://api.example/orders");

        link(&fixture, "rt-1", "flows/orders.json", &body).await;
        fixture.runtime.seed_definition("rt-1", body.clone(), None);
        fixture
            .repository
            .put_file("c1", "flows/orders.json", &body.to_string());

        let summary = fixture.detector.detect("default", "prod").await.unwrap();
        assert_eq!(summary.status, DriftStatus::InSync);
        assert_eq!(summary.commit.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn hash_mismatch_is_classified_per_item() {
        let fixture = fixture().await;
        let committed = definition("orders", "https://api.example/orders");
        let edited = definition("orders", "https://api.example/orders-v2");

        link(&fixture, "rt-1", "flows/orders.json", &committed).await;
        fixture.runtime.seed_definition("rt-1", edited, None);
        fixture
            .repository
            .put_file("c1", "flows/orders.json", &committed.to_string());

        let summary = fixture.detector.detect("default", "prod").await.unwrap();
        assert_eq!(summary.status, DriftStatus::DriftDetected);
        assert_eq!(summary.affected.len(), 1);
        assert_eq!(summary.affected[0].reason, DriftReason::HashMismatch);
        assert_ne!(
            summary.affected[0].runtime_hash,
            summary.affected[0].repository_hash
        );
    }

    #[tokio::test]
    async fn missing_sides_are_distinguished() {
        let fixture = fixture().await;
        let body_a = definition("orders", "https://api.example/orders");
        let body_b = definition("invoices", "https://api.example/invoices");

        // rt-1 exists in the runtime but its file is gone from the commit.
        link(&fixture, "rt-1", "flows/orders.json", &body_a).await;
        fixture.runtime.seed_definition("rt-1", body_a, None);

        // rt-2 is tracked but the runtime no longer returns it.
        link(&fixture, "rt-2", "flows/invoices.json", &body_b).await;
        fixture
            .repository
            .put_file("c1", "flows/invoices.json", &body_b.to_string());

        let summary = fixture.detector.detect("default", "prod").await.unwrap();
        assert_eq!(summary.status, DriftStatus::DriftDetected);
        assert_eq!(summary.affected.len(), 2);

        let orders = summary
            .affected
            .iter()
            .find(|i| i.runtime_id == "rt-1")
            .unwrap();
        assert_eq!(orders.reason, DriftReason::MissingFromRepository);

        let invoices = summary
            .affected
            .iter()
            .find(|i| i.runtime_id == "rt-2")
            .unwrap();
        assert_eq!(invoices.reason, DriftReason::MissingFromRuntime);

        // The vanished mapping moved to `missing`.
        let pool = fixture.db.tenant_pool("default").await.unwrap();
        let mapping = MappingStore::new(pool).get("prod", "rt-2").await.unwrap().unwrap();
        assert_eq!(mapping.status, MappingStatus::Missing);
    }

    #[tokio::test]
    async fn fetch_failure_retains_last_known_status() {
        let fixture = fixture().await;
        let body = definition("orders", "https://api.example/orders");

        link(&fixture, "rt-1", "flows/orders.json", &body).await;
        fixture.runtime.seed_definition("rt-1", body.clone(), None);
        fixture
            .repository
            .put_file("c1", "flows/orders.json", &body.to_string());

        let first = fixture.detector.detect("default", "prod").await.unwrap();
        assert_eq!(first.status, DriftStatus::InSync);

        fixture.runtime.set_fail_listing(true);
        let second = fixture.detector.detect("default", "prod").await.unwrap();
        assert_eq!(second.status, DriftStatus::Error);
        assert_eq!(second.last_known, Some(DriftStatus::InSync));
        assert!(second.message.is_some());
    }
}
