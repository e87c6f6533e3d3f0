/// Promotion executor
///
/// Copies selected definitions from a source environment into a target
/// environment with an all-or-nothing contract: a pre-write snapshot is
/// taken first, writes are applied sequentially, and any write failure rolls
/// back every already-applied item from the snapshot. Credential references
/// are rewritten to the target's credential ids by logical name; secrets are
/// never read or copied.

use crate::adapters::{AdapterFactory, RuntimeAdapter, RuntimeCredential};
use crate::config::PromotionPolicy;
use crate::drift::incidents::{ArtifactStore, IncidentArtifact};
use crate::error::ReconcileError;
use crate::events::{EventBus, EventKind, ReconcileEvent};
use crate::locks::EnvLockRegistry;
use crate::mapping::{Mapping, MappingEvent, MappingStatus, MappingStore};
use crate::normalize::normalize;
use crate::promote::snapshots::{SnapshotKind, SnapshotStore};
use crate::promote::types::{
    ItemOutcome, ItemStatus, PromotionRequest, PromotionResult, PromotionStatus,
};
use crate::registry::RegistryStore;
use crate::tenant::database::TenantDatabaseManager;
use crate::tenant::environments::EnvironmentRegistry;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One fully planned item, resolved before any snapshot or write.
struct PlannedItem {
    registry_id: String,
    name: String,
    /// Outgoing body, credentials already rewritten for the target
    body: Value,
    /// Content hash of the normalized source definition
    source_hash: String,
    /// Existing live target mapping, when the item already exists there
    target_mapping: Option<Mapping>,
    /// Target already matches the source hash; skip the write
    unchanged: bool,
}

/// Planning result per selected item. An item-level planning failure (e.g. a
/// credential with no compatible target counterpart) fails only that item;
/// the rest of the batch proceeds.
enum Planned {
    Ready(PlannedItem),
    Failed {
        registry_id: String,
        name: String,
        detail: String,
    },
}

/// What a write actually did, for rollback bookkeeping.
enum Applied {
    Updated { runtime_id: String },
    Created { runtime_id: String },
}

pub struct PromotionExecutor {
    db: Arc<TenantDatabaseManager>,
    environments: Arc<EnvironmentRegistry>,
    adapters: Arc<dyn AdapterFactory>,
    locks: Arc<EnvLockRegistry>,
    events: Arc<EventBus>,
    policy: PromotionPolicy,
}

impl PromotionExecutor {
    pub fn new(
        db: Arc<TenantDatabaseManager>,
        environments: Arc<EnvironmentRegistry>,
        adapters: Arc<dyn AdapterFactory>,
        locks: Arc<EnvLockRegistry>,
        events: Arc<EventBus>,
        policy: PromotionPolicy,
    ) -> Self {
        Self {
            db,
            environments,
            adapters,
            locks,
            events,
            policy,
        }
    }

    /// Execute one promotion.
    ///
    /// Batch-level planning failures (unknown selection, source fetch
    /// errors) abort before any mutation; an item-level planning failure
    /// such as a missing target credential fails only that item. Write
    /// failures roll back everything applied.
    pub async fn promote(
        &self,
        tenant: &str,
        request: &PromotionRequest,
    ) -> Result<PromotionResult, ReconcileError> {
        if request.source == request.target {
            return Err(ReconcileError::Conflict {
                item: format!("promotion to {}", request.target),
                detail: "source and target are the same environment".to_string(),
            });
        }
        if request.selection.is_empty() {
            return Err(ReconcileError::Conflict {
                item: "promotion selection".to_string(),
                detail: "selection is empty".to_string(),
            });
        }

        let source_env = self.environments.get(tenant, &request.source).ok_or_else(|| {
            ReconcileError::NotFound(format!("environment {}/{}", tenant, request.source))
        })?;
        let target_env = self.environments.get(tenant, &request.target).ok_or_else(|| {
            ReconcileError::NotFound(format!("environment {}/{}", tenant, request.target))
        })?;

        // Both sides are held for the whole promotion: the target against
        // concurrent writes, the source against a sync mutating mappings
        // mid-plan.
        let _target_guard = self
            .locks
            .try_acquire(tenant, &request.target, "promotion")
            .ok_or_else(|| ReconcileError::Busy {
                environment: request.target.clone(),
                operation: "promotion".to_string(),
            })?;
        let _source_guard = self
            .locks
            .try_acquire(tenant, &request.source, "promotion")
            .ok_or_else(|| ReconcileError::Busy {
                environment: request.source.clone(),
                operation: "promotion".to_string(),
            })?;

        let pool = self.db.tenant_pool(tenant).await?;
        let mappings = MappingStore::new(pool.clone());
        let registry = RegistryStore::new(pool.clone());
        let source_adapter = self.adapters.runtime(&source_env)?;
        let target_adapter = self.adapters.runtime(&target_env)?;

        let promotion_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        tracing::info!(
            "🚚 Promotion {} started: {} -> {} ({} items)",
            promotion_id,
            request.source,
            request.target,
            request.selection.len()
        );

        // Phase 1: plan every item (read-only).
        let target_credentials = target_adapter
            .list_credentials()
            .await
            .map_err(|e| ReconcileError::Fatal {
                operation: "promotion planning".to_string(),
                message: format!("listing target credentials failed: {}", e),
            })?;

        let mut plan = Vec::new();
        for registry_id in &request.selection {
            plan.push(
                self.plan_item(
                    &mappings,
                    &registry,
                    source_adapter.as_ref(),
                    request,
                    registry_id,
                    &target_credentials,
                )
                .await?,
            );
        }
        let planning_failures = plan
            .iter()
            .filter(|p| matches!(p, Planned::Failed { .. }))
            .count();

        // Phase 2: pre-write snapshot of the full target runtime state, not
        // just the selection, so rollback evidence covers everything. Any
        // failure here aborts before the first mutation.
        let snapshots = SnapshotStore::new(pool.clone());
        let mut pre_content = Map::new();
        let target_state = target_adapter
            .list_definitions()
            .await
            .map_err(|e| ReconcileError::Fatal {
                operation: "promotion snapshot".to_string(),
                message: format!("listing target definitions failed: {}", e),
            })?;
        for def in target_state {
            pre_content.insert(def.id, def.body);
        }
        snapshots
            .record(
                &request.target,
                &promotion_id,
                SnapshotKind::Pre,
                &Value::Object(pre_content.clone()),
            )
            .await?;

        // Phase 3: sequential writes with rollback on first failure.
        let mut outcomes: Vec<ItemOutcome> = Vec::new();
        let mut applied: Vec<(usize, Applied)> = Vec::new();
        let mut failure: Option<(usize, String)> = None;

        for (idx, entry) in plan.iter().enumerate() {
            let item = match entry {
                Planned::Failed {
                    registry_id,
                    name,
                    detail,
                } => {
                    tracing::warn!("⚠️ Skipping '{}': {}", name, detail);
                    outcomes.push(ItemOutcome {
                        registry_id: registry_id.clone(),
                        name: name.clone(),
                        status: ItemStatus::Failed,
                        detail: Some(detail.clone()),
                    });
                    continue;
                }
                Planned::Ready(item) => item,
            };
            if item.unchanged {
                outcomes.push(outcome(item, ItemStatus::Unchanged, None));
                continue;
            }

            let write = match &item.target_mapping {
                Some(mapping) => target_adapter
                    .update_definition(&mapping.runtime_id, &item.body)
                    .await
                    .map(|def| Applied::Updated { runtime_id: def.id }),
                None => target_adapter
                    .create_definition(&item.body)
                    .await
                    .map(|def| Applied::Created { runtime_id: def.id }),
            };

            match write {
                Ok(action) => {
                    outcomes.push(outcome(item, ItemStatus::Applied, None));
                    applied.push((idx, action));
                }
                Err(err) => {
                    failure = Some((idx, err.to_string()));
                    outcomes.push(outcome(item, ItemStatus::Failed, Some(err.to_string())));
                    break;
                }
            }
        }

        if let Some((failed_idx, message)) = failure {
            for entry in plan.iter().skip(failed_idx + 1) {
                match entry {
                    Planned::Ready(item) => {
                        outcomes.push(outcome(item, ItemStatus::NotAttempted, None))
                    }
                    Planned::Failed {
                        registry_id,
                        name,
                        detail,
                    } => outcomes.push(ItemOutcome {
                        registry_id: registry_id.clone(),
                        name: name.clone(),
                        status: ItemStatus::Failed,
                        detail: Some(detail.clone()),
                    }),
                }
            }
            let status = self
                .rollback(
                    tenant,
                    request,
                    &promotion_id,
                    target_adapter.as_ref(),
                    &pre_content,
                    &applied,
                    &mut outcomes,
                    &plan,
                )
                .await;

            self.events.emit(ReconcileEvent::new(
                EventKind::PromotionFailed,
                tenant,
                Some(&request.target),
                json!({
                    "promotion_id": promotion_id,
                    "source": request.source,
                    "failure": message,
                    "items": outcomes,
                }),
            ));

            return Ok(PromotionResult {
                id: promotion_id,
                source: request.source.clone(),
                target: request.target.clone(),
                status,
                items: outcomes,
                started_at,
                finished_at: Utc::now(),
            });
        }

        // Phase 4: post-write snapshot and mapping updates. The post snapshot
        // is the pre state overlaid with what this promotion wrote, i.e. the
        // full target state after the pass.
        let mut post_content = pre_content.clone();
        for (idx, action) in &applied {
            let Planned::Ready(item) = &plan[*idx] else {
                continue;
            };
            let runtime_id = match action {
                Applied::Updated { runtime_id } | Applied::Created { runtime_id } => runtime_id,
            };
            post_content.insert(runtime_id.clone(), item.body.clone());
            self.record_target_mapping(&mappings, request, item, runtime_id).await?;
        }
        snapshots
            .record(
                &request.target,
                &promotion_id,
                SnapshotKind::Post,
                &Value::Object(post_content),
            )
            .await?;

        if let Some(incident_id) = &request.incident_id {
            let mut artifact = IncidentArtifact::new(incident_id, "promotion", &promotion_id);
            artifact.created_by = Some(request.actor.clone());
            artifact.note = Some(format!("{} -> {}", request.source, request.target));
            ArtifactStore::new(pool.clone()).append(&artifact).await?;
        }

        let status = if planning_failures == 0 {
            self.events.emit(ReconcileEvent::new(
                EventKind::PromotionSucceeded,
                tenant,
                Some(&request.target),
                json!({
                    "promotion_id": promotion_id,
                    "source": request.source,
                    "items": outcomes,
                }),
            ));
            tracing::info!("✅ Promotion {} succeeded", promotion_id);
            PromotionStatus::Succeeded
        } else {
            self.events.emit(ReconcileEvent::new(
                EventKind::PromotionFailed,
                tenant,
                Some(&request.target),
                json!({
                    "promotion_id": promotion_id,
                    "source": request.source,
                    "failure": format!("{} item(s) failed planning", planning_failures),
                    "items": outcomes,
                }),
            ));
            tracing::warn!(
                "⚠️ Promotion {} completed with {} planning failure(s)",
                promotion_id,
                planning_failures
            );
            PromotionStatus::PartiallySucceeded
        };

        Ok(PromotionResult {
            id: promotion_id,
            source: request.source.clone(),
            target: request.target.clone(),
            status,
            items: outcomes,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn plan_item(
        &self,
        mappings: &MappingStore,
        registry: &RegistryStore,
        source_adapter: &dyn RuntimeAdapter,
        request: &PromotionRequest,
        registry_id: &str,
        target_credentials: &[RuntimeCredential],
    ) -> Result<Planned, ReconcileError> {
        let entry = registry
            .get(registry_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("registry entry {}", registry_id)))?;

        let source_mapping = mappings
            .find_live_by_registry(&request.source, registry_id)
            .await?
            .ok_or_else(|| ReconcileError::Conflict {
                item: format!("registry entry {}", registry_id),
                detail: format!("no live mapping in source environment '{}'", request.source),
            })?;

        let source_def = source_adapter
            .get_definition(&source_mapping.runtime_id)
            .await
            .map_err(|e| ReconcileError::Fatal {
                operation: "promotion planning".to_string(),
                message: format!(
                    "fetching source definition {} failed: {}",
                    source_mapping.runtime_id, e
                ),
            })?;

        let normalized = normalize(&source_def.body).map_err(|e| ReconcileError::Fatal {
            operation: "promotion planning".to_string(),
            message: format!("source definition '{}' failed to normalize: {}", entry.name, e),
        })?;

        // A rewrite failure fails only this item, never the batch.
        let body = match rewrite_for_target(&source_def.body, target_credentials, &self.policy) {
            Ok(body) => body,
            Err(detail) => {
                return Ok(Planned::Failed {
                    registry_id: registry_id.to_string(),
                    name: entry.name,
                    detail,
                })
            }
        };

        let target_mapping = mappings
            .find_live_by_registry(&request.target, registry_id)
            .await?;
        let unchanged = target_mapping
            .as_ref()
            .and_then(|m| m.runtime_hash.as_deref())
            == Some(normalized.content_hash.as_str());

        Ok(Planned::Ready(PlannedItem {
            registry_id: registry_id.to_string(),
            name: entry.name,
            body,
            source_hash: normalized.content_hash,
            target_mapping,
            unchanged,
        }))
    }

    /// Restore every applied item in reverse order.
    #[allow(clippy::too_many_arguments)]
    async fn rollback(
        &self,
        tenant: &str,
        request: &PromotionRequest,
        promotion_id: &str,
        target_adapter: &dyn RuntimeAdapter,
        pre_content: &Map<String, Value>,
        applied: &[(usize, Applied)],
        outcomes: &mut [ItemOutcome],
        plan: &[Planned],
    ) -> PromotionStatus {
        let mut clean = true;

        for (idx, action) in applied.iter().rev() {
            let Planned::Ready(item) = &plan[*idx] else {
                continue;
            };
            let restore = match action {
                Applied::Updated { runtime_id } => match pre_content.get(runtime_id) {
                    Some(previous) => target_adapter
                        .update_definition(runtime_id, previous)
                        .await
                        .map(|_| ()),
                    None => Err(crate::adapters::AdapterError::Permanent {
                        operation: format!("restore {}", runtime_id),
                        message: "no pre-write snapshot entry".to_string(),
                    }),
                },
                Applied::Created { runtime_id } => {
                    target_adapter.delete_definition(runtime_id).await
                }
            };

            let slot = outcomes
                .iter_mut()
                .find(|o| o.registry_id == item.registry_id);
            match restore {
                Ok(()) => {
                    if let Some(slot) = slot {
                        slot.status = ItemStatus::RolledBack;
                    }
                }
                Err(err) => {
                    clean = false;
                    tracing::error!(
                        "🔥 Rollback of '{}' in {} failed: {}",
                        item.name,
                        request.target,
                        err
                    );
                    if let Some(slot) = slot {
                        slot.status = ItemStatus::RollbackFailed;
                        slot.detail = Some(err.to_string());
                    }
                }
            }
        }

        let kind = if clean {
            EventKind::PromotionRolledBack
        } else {
            EventKind::PromotionRollbackFailed
        };
        self.events.emit(ReconcileEvent::new(
            kind,
            tenant,
            Some(&request.target),
            json!({ "promotion_id": promotion_id, "source": request.source }),
        ));

        if clean {
            PromotionStatus::RolledBack
        } else {
            PromotionStatus::RollbackFailed
        }
    }

    async fn record_target_mapping(
        &self,
        mappings: &MappingStore,
        request: &PromotionRequest,
        item: &PlannedItem,
        runtime_id: &str,
    ) -> Result<(), ReconcileError> {
        // The promotion explicitly binds the target object to the registry
        // entry, so it flows through the state machine as a manual link.
        let next = MappingStatus::transition(
            item.target_mapping.as_ref().map(|m| m.status),
            MappingEvent::ManualLink,
        )
        .map_err(|e| ReconcileError::InvalidTransition(e.to_string()))?;

        let mut mapping = match &item.target_mapping {
            Some(existing) => existing.clone(),
            None => Mapping::new(&request.target, runtime_id, next),
        };
        mapping.registry_id = Some(item.registry_id.clone());
        mapping.status = next;
        mapping.name = Some(item.name.clone());
        mapping.runtime_hash = Some(item.source_hash.clone());
        mapping.updated_at = Utc::now();
        mappings.upsert(&mapping).await?;
        Ok(())
    }
}

fn outcome(item: &PlannedItem, status: ItemStatus, detail: Option<String>) -> ItemOutcome {
    ItemOutcome {
        registry_id: item.registry_id.clone(),
        name: item.name.clone(),
        status,
        detail,
    }
}

/// Prepare a source body for the target runtime: drop the source-assigned id
/// and rewrite every credential reference to the target's credential by
/// logical name. Secrets are never involved; only id/name references move.
fn rewrite_for_target(
    source_body: &Value,
    target_credentials: &[RuntimeCredential],
    policy: &PromotionPolicy,
) -> Result<Value, String> {
    let mut body = source_body.clone();
    let Some(obj) = body.as_object_mut() else {
        return Err("definition body is not a JSON object".to_string());
    };
    obj.remove("id");

    let Some(nodes) = obj.get_mut("nodes").and_then(|n| n.as_array_mut()) else {
        return Ok(body);
    };

    for node in nodes {
        let node_name = node
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or("<unnamed>")
            .to_string();
        let Some(creds) = node.get_mut("credentials").and_then(|c| c.as_object_mut()) else {
            continue;
        };

        for (kind, reference) in creds.iter_mut() {
            let name = reference
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| {
                    format!("node '{}' has a {} credential without a name", node_name, kind)
                })?
                .to_string();

            match target_credentials.iter().find(|c| c.name == name) {
                Some(target) => {
                    *reference = json!({ "id": target.id, "name": name });
                }
                None if policy.allow_credential_placeholders => {
                    *reference = json!({ "name": name });
                }
                None => {
                    return Err(format!(
                        "credential '{}' ({}) referenced by node '{}' does not exist in the target",
                        name, kind, node_name
                    ));
                }
            }
        }
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockAdapterFactory, MockRuntime};
    use crate::tenant::environments::EnvironmentStore;
    use crate::tenant::types::{Environment, RuntimeEndpoint};
    use tempfile::TempDir;

    fn definition(name: &str, url: &str) -> Value {
        json!({
            "id": "src-id",
            "name": name,
            "nodes": [
                {
                    "name": "store",
                    "type": "postgres",
                    "parameters": { "url": url },
                    "credentials": { "postgres": { "id": "cred-src", "name": "main-db" } }
                }
            ],
            "connections": {},
            "settings": {},
        })
    }

    struct Fixture {
        db: Arc<TenantDatabaseManager>,
        source: Arc<MockRuntime>,
        target: Arc<MockRuntime>,
        executor: PromotionExecutor,
        _dir: TempDir,
    }

    async fn fixture(allow_placeholders: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(TenantDatabaseManager::new(
            dir.path().to_string_lossy().to_string(),
        ));
        let pool = db.tenant_pool("default").await.unwrap();

        let store = EnvironmentStore::new(pool.clone());
        for slug in ["stage", "prod"] {
            store
                .upsert(&Environment::new(
                    slug,
                    slug,
                    RuntimeEndpoint {
                        base_url: format!("https://{}.example.test", slug),
                        api_key_env: "RUNTIME_API_KEY".to_string(),
                    },
                ))
                .await
                .unwrap();
        }

        let environments = Arc::new(EnvironmentRegistry::new(
            Arc::clone(&db),
            vec!["default".to_string()],
        ));
        environments.init_from_storage().await.unwrap();

        let source = MockRuntime::new();
        let target = MockRuntime::new();
        target.seed_credential("cred-prod", "main-db", "postgres");

        let adapters = Arc::new(
            MockAdapterFactory::new()
                .with_runtime("stage", Arc::clone(&source))
                .with_runtime("prod", Arc::clone(&target)),
        );

        let executor = PromotionExecutor::new(
            Arc::clone(&db),
            environments,
            adapters,
            EnvLockRegistry::new(),
            Arc::new(EventBus::new(16)),
            PromotionPolicy {
                allow_credential_placeholders: allow_placeholders,
            },
        );

        Fixture {
            db,
            source,
            target,
            executor,
            _dir: dir,
        }
    }

    /// Seed one promotable item: registry entry, live source mapping, and the
    /// definition in the source runtime. Returns the registry id.
    async fn seed_item(fixture: &Fixture, runtime_id: &str, body: &Value) -> String {
        let pool = fixture.db.tenant_pool("default").await.unwrap();
        let normalized = normalize(body).unwrap();
        let entry = RegistryStore::new(pool.clone())
            .onboard_from_runtime(&normalized.name, &normalized.content_hash, &normalized.tree)
            .await
            .unwrap();

        let mut mapping = Mapping::new("stage", runtime_id, MappingStatus::Linked);
        mapping.registry_id = Some(entry.id.clone());
        mapping.name = Some(normalized.name);
        MappingStore::new(pool).upsert(&mapping).await.unwrap();

        fixture.source.seed_definition(runtime_id, body.clone(), None);
        entry.id
    }

    fn request(selection: Vec<String>) -> PromotionRequest {
        PromotionRequest {
            source: "stage".to_string(),
            target: "prod".to_string(),
            selection,
            incident_id: None,
            actor: "ops".to_string(),
        }
    }

    #[tokio::test]
    async fn promotion_creates_target_definitions_and_mappings() {
        let fixture = fixture(false).await;
        let body = definition("orders", "https://api.example/orders");
        let registry_id = seed_item(&fixture, "rt-1", &body).await;

        let result = fixture
            .executor
            .promote("default", &request(vec![registry_id.clone()]))
            .await
            .unwrap();

        assert_eq!(result.status, PromotionStatus::Succeeded);
        assert_eq!(result.items[0].status, ItemStatus::Applied);
        assert_eq!(fixture.target.definition_count(), 1);

        // The written body carries the target credential id, not the source's.
        let written = fixture.target.definition_body("gen-1").unwrap();
        let cred = &written["nodes"][0]["credentials"]["postgres"];
        assert_eq!(cred["id"], "cred-prod");
        assert!(written.get("id").is_none());

        // A live linked mapping now exists in the target.
        let pool = fixture.db.tenant_pool("default").await.unwrap();
        let mapping = MappingStore::new(pool)
            .find_live_by_registry("prod", &registry_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.status, MappingStatus::Linked);
    }

    #[tokio::test]
    async fn matching_target_is_reported_unchanged_without_a_write() {
        let fixture = fixture(false).await;
        let body = definition("orders", "https://api.example/orders");
        let registry_id = seed_item(&fixture, "rt-1", &body).await;

        // First promotion applies; the second finds the hash already matching.
        fixture
            .executor
            .promote("default", &request(vec![registry_id.clone()]))
            .await
            .unwrap();
        let writes_after_first = fixture.target.write_log.lock().unwrap().len();

        let second = fixture
            .executor
            .promote("default", &request(vec![registry_id]))
            .await
            .unwrap();
        assert_eq!(second.items[0].status, ItemStatus::Unchanged);
        assert_eq!(
            fixture.target.write_log.lock().unwrap().len(),
            writes_after_first
        );
    }

    #[tokio::test]
    async fn mid_pass_failure_rolls_back_applied_items() {
        let fixture = fixture(false).await;

        let body1 = definition("alpha", "https://api.example/alpha");
        let body2 = definition("beta", "https://api.example/beta");
        let body3 = definition("gamma", "https://api.example/gamma");
        let id1 = seed_item(&fixture, "rt-1", &body1).await;
        let id2 = seed_item(&fixture, "rt-2", &body2).await;
        let id3 = seed_item(&fixture, "rt-3", &body3).await;

        // The second item's create fails mid-pass.
        fixture.target.fail_create_named("beta");

        let result = fixture
            .executor
            .promote("default", &request(vec![id1.clone(), id2.clone(), id3.clone()]))
            .await
            .unwrap();

        assert_eq!(result.status, PromotionStatus::RolledBack);
        let by_id = |id: &str| result.items.iter().find(|i| i.registry_id == id).unwrap();
        assert_eq!(by_id(&id1).status, ItemStatus::RolledBack);
        assert_eq!(by_id(&id2).status, ItemStatus::Failed);
        assert_eq!(by_id(&id3).status, ItemStatus::NotAttempted);

        // The created first item was deleted again: target is untouched.
        assert_eq!(fixture.target.definition_count(), 0);

        // No mapping was minted for the rolled-back item.
        let pool = fixture.db.tenant_pool("default").await.unwrap();
        assert!(MappingStore::new(pool)
            .find_live_by_registry("prod", &id1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_failure_restores_the_pre_write_body() {
        let fixture = fixture(false).await;

        let original = definition("alpha", "https://api.example/alpha-v1");
        let edited = definition("alpha", "https://api.example/alpha-v2");
        let id1 = seed_item(&fixture, "rt-1", &edited).await;
        let body2 = definition("beta", "https://api.example/beta");
        let id2 = seed_item(&fixture, "rt-2", &body2).await;

        // alpha already exists in the target with the original body.
        fixture.target.seed_definition("prod-1", original.clone(), None);
        let pool = fixture.db.tenant_pool("default").await.unwrap();
        let mut existing = Mapping::new("prod", "prod-1", MappingStatus::Linked);
        existing.registry_id = Some(id1.clone());
        MappingStore::new(pool).upsert(&existing).await.unwrap();

        fixture.target.fail_create_named("beta");

        let result = fixture
            .executor
            .promote("default", &request(vec![id1.clone(), id2]))
            .await
            .unwrap();
        assert_eq!(result.status, PromotionStatus::RolledBack);

        // The updated definition was restored byte-for-byte.
        assert_eq!(fixture.target.definition_body("prod-1").unwrap(), original);
    }

    #[tokio::test]
    async fn missing_target_credential_fails_only_that_item() {
        let fixture = fixture(false).await;

        let healthy = definition("alpha", "https://api.example/alpha");
        let mut broken = definition("beta", "https://api.example/beta");
        broken["nodes"][0]["credentials"]["postgres"]["name"] = json!("unknown-db");
        let id1 = seed_item(&fixture, "rt-1", &healthy).await;
        let id2 = seed_item(&fixture, "rt-2", &broken).await;

        let result = fixture
            .executor
            .promote("default", &request(vec![id1.clone(), id2.clone()]))
            .await
            .unwrap();

        // The healthy item was applied; only the broken one failed.
        assert_eq!(result.status, PromotionStatus::PartiallySucceeded);
        let by_id = |id: &str| result.items.iter().find(|i| i.registry_id == id).unwrap();
        assert_eq!(by_id(&id1).status, ItemStatus::Applied);
        assert_eq!(by_id(&id2).status, ItemStatus::Failed);
        assert!(by_id(&id2).detail.as_deref().unwrap().contains("unknown-db"));
        assert_eq!(fixture.target.definition_count(), 1);
    }

    #[tokio::test]
    async fn placeholder_policy_allows_name_only_credentials() {
        let fixture = fixture(true).await;
        let mut body = definition("orders", "https://api.example/orders");
        body["nodes"][0]["credentials"]["postgres"]["name"] = json!("unknown-db");
        let registry_id = seed_item(&fixture, "rt-1", &body).await;

        let result = fixture
            .executor
            .promote("default", &request(vec![registry_id]))
            .await
            .unwrap();
        assert_eq!(result.status, PromotionStatus::Succeeded);

        let written = fixture.target.definition_body("gen-1").unwrap();
        let cred = &written["nodes"][0]["credentials"]["postgres"];
        assert_eq!(cred["name"], "unknown-db");
        assert!(cred.get("id").is_none());
    }

    #[tokio::test]
    async fn pre_snapshot_captures_the_full_target_state() {
        let fixture = fixture(false).await;
        let original = definition("alpha", "https://api.example/alpha-v1");
        let edited = definition("alpha", "https://api.example/alpha-v2");
        let id1 = seed_item(&fixture, "rt-1", &edited).await;

        fixture.target.seed_definition("prod-1", original.clone(), None);
        let pool = fixture.db.tenant_pool("default").await.unwrap();
        let mut existing = Mapping::new("prod", "prod-1", MappingStatus::Linked);
        existing.registry_id = Some(id1.clone());
        MappingStore::new(pool.clone()).upsert(&existing).await.unwrap();

        // A definition outside the selection is snapshotted too.
        let bystander = definition("gamma", "https://api.example/gamma");
        fixture.target.seed_definition("prod-9", bystander.clone(), None);

        let result = fixture
            .executor
            .promote("default", &request(vec![id1]))
            .await
            .unwrap();

        let snapshot = SnapshotStore::new(pool)
            .get(&result.id, SnapshotKind::Pre)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.content["prod-1"], original);
        assert_eq!(snapshot.content["prod-9"], bystander);
    }

    #[tokio::test]
    async fn busy_environment_rejects_the_promotion() {
        let fixture = fixture(false).await;
        let body = definition("orders", "https://api.example/orders");
        let registry_id = seed_item(&fixture, "rt-1", &body).await;

        // Hold the target's single-flight lock as another pass would.
        let _held = fixture
            .executor
            .locks
            .try_acquire("default", "prod", "sync")
            .unwrap();

        let err = fixture
            .executor
            .promote("default", &request(vec![registry_id]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Busy { .. }));
    }
}
