/// Sync orchestrator
///
/// One pass brings an environment's mappings up to date in three phases:
///
///   1. repository ingestion — normalize every definition file at the pinned
///      branch head and upsert registry entries
///   2. runtime reconciliation — walk the runtime listing in id order,
///      resolve identity per item, and transition its mapping
///   3. disappearance — tracked objects the runtime no longer returns are
///      moved to `missing`
///
/// A single item failing never aborts the pass; it is recorded in the report
/// and the pass continues. Progress is checkpointed per batch so an
/// interrupted pass resumes at the same pinned commit.

use crate::adapters::{with_retry, AdapterError, AdapterFactory};
use crate::config::{RetryPolicy, SyncConfig};
use crate::error::ReconcileError;
use crate::events::{EventBus, EventKind, ReconcileEvent};
use crate::locks::EnvLockRegistry;
use crate::mapping::{resolve, Identity, Mapping, MappingEvent, MappingStatus, MappingStore};
use crate::normalize::normalize;
use crate::registry::RegistryStore;
use crate::sync::checkpoints::CheckpointStore;
use crate::tenant::database::TenantDatabaseManager;
use crate::tenant::environments::EnvironmentRegistry;
use crate::tenant::types::Environment;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub environment: String,
    /// Repository commit the pass was pinned to, when one is configured
    pub commit: Option<String>,
    /// Definition files ingested into the registry
    pub ingested: usize,
    pub linked: usize,
    pub unmapped: usize,
    /// Tracked objects newly marked missing
    pub disappeared: usize,
    /// Items skipped via the updated-at short-circuit
    pub skipped: usize,
    /// Identity conflicts, surfaced but never auto-resolved
    pub conflicts: Vec<String>,
    /// Per-item failures that did not abort the pass
    pub errors: Vec<String>,
    /// Whether the pass resumed from a checkpoint
    pub resumed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct SyncOrchestrator {
    db: Arc<TenantDatabaseManager>,
    environments: Arc<EnvironmentRegistry>,
    adapters: Arc<dyn AdapterFactory>,
    locks: Arc<EnvLockRegistry>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(
        db: Arc<TenantDatabaseManager>,
        environments: Arc<EnvironmentRegistry>,
        adapters: Arc<dyn AdapterFactory>,
        locks: Arc<EnvLockRegistry>,
        events: Arc<EventBus>,
        retry: RetryPolicy,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            environments,
            adapters,
            locks,
            events,
            retry,
            config,
        }
    }

    /// Run one sync pass for an environment.
    pub async fn sync(&self, tenant: &str, slug: &str) -> Result<SyncReport, ReconcileError> {
        let environment = self
            .environments
            .get(tenant, slug)
            .ok_or_else(|| ReconcileError::NotFound(format!("environment {}/{}", tenant, slug)))?;

        let _guard = self
            .locks
            .try_acquire(tenant, slug, "sync")
            .ok_or_else(|| ReconcileError::Busy {
                environment: slug.to_string(),
                operation: "sync".to_string(),
            })?;

        let pool = self.db.tenant_pool(tenant).await?;
        let started_at = Utc::now();
        let mut report = SyncReport {
            environment: slug.to_string(),
            commit: None,
            ingested: 0,
            linked: 0,
            unmapped: 0,
            disappeared: 0,
            skipped: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
            resumed: false,
            started_at,
            finished_at: started_at,
        };

        // Phase 1: repository ingestion at one pinned commit.
        if environment.repository.is_some() {
            self.ingest_repository(&pool, &environment, &mut report)
                .await?;
        }

        // Phase 2: runtime reconciliation.
        let seen = self
            .reconcile_runtime(&pool, &environment, &mut report)
            .await?;

        // Phase 3: tracked objects the runtime no longer returns.
        self.mark_disappeared(&pool, slug, &seen, &mut report).await?;

        CheckpointStore::new(pool.clone()).clear(slug).await?;
        report.finished_at = Utc::now();

        tracing::info!(
            "✅ Sync for {}/{}: {} ingested, {} linked, {} unmapped, {} missing, {} skipped, {} conflicts",
            tenant,
            slug,
            report.ingested,
            report.linked,
            report.unmapped,
            report.disappeared,
            report.skipped,
            report.conflicts.len()
        );
        self.events.emit(ReconcileEvent::new(
            EventKind::SyncCompleted,
            tenant,
            Some(slug),
            json!({
                "commit": report.commit,
                "ingested": report.ingested,
                "linked": report.linked,
                "unmapped": report.unmapped,
                "disappeared": report.disappeared,
                "conflicts": report.conflicts.len(),
                "errors": report.errors.len(),
            }),
        ));

        Ok(report)
    }

    async fn ingest_repository(
        &self,
        pool: &SqlitePool,
        environment: &Environment,
        report: &mut SyncReport,
    ) -> Result<(), ReconcileError> {
        let repo_cfg = environment
            .repository
            .as_ref()
            .ok_or_else(|| ReconcileError::Configuration {
                environment: environment.slug.clone(),
                what: "repository location".to_string(),
            })?;
        let client = self.adapters.repository(environment)?;
        let registry = RegistryStore::new(pool.clone());

        let commit = with_retry(&self.retry, "resolve branch head", || {
            client.resolve_branch_head(&repo_cfg.branch)
        })
        .await
        .map_err(|e| self.transient("resolve branch head", e))?;

        let paths = with_retry(&self.retry, "list repository files", || {
            client.list_files(&repo_cfg.root, &commit)
        })
        .await
        .map_err(|e| self.transient("list repository files", e))?;

        for path in paths {
            let content = match with_retry(&self.retry, "read repository file", || {
                client.read_file(&path, &commit)
            })
            .await
            {
                Ok(content) => content,
                Err(err) => {
                    report.errors.push(format!("{}: {}", path, err));
                    continue;
                }
            };

            let normalized = match serde_json::from_str::<serde_json::Value>(&content)
                .map_err(|e| e.to_string())
                .and_then(|raw| normalize(&raw).map_err(|e| e.to_string()))
            {
                Ok(normalized) => normalized,
                Err(err) => {
                    tracing::warn!("⚠️ Skipping malformed definition file {}: {}", path, err);
                    report.errors.push(format!("{}: {}", path, err));
                    continue;
                }
            };

            registry
                .upsert_from_repository(
                    &path,
                    &repo_cfg.branch,
                    &commit,
                    &normalized.name,
                    &normalized.content_hash,
                    &normalized.tree,
                )
                .await?;
            report.ingested += 1;
        }

        report.commit = Some(commit);
        Ok(())
    }

    /// Walk the runtime listing in id order and bring each mapping up to
    /// date. Returns the set of runtime ids seen.
    async fn reconcile_runtime(
        &self,
        pool: &SqlitePool,
        environment: &Environment,
        report: &mut SyncReport,
    ) -> Result<HashSet<String>, ReconcileError> {
        let slug = environment.slug.as_str();
        let adapter = self.adapters.runtime(environment)?;
        let mappings = MappingStore::new(pool.clone());
        let registry = RegistryStore::new(pool.clone());
        let checkpoints = CheckpointStore::new(pool.clone());

        let mut definitions = with_retry(&self.retry, "list runtime definitions", || {
            adapter.list_definitions()
        })
        .await
        .map_err(|e| self.transient("list runtime definitions", e))?;
        definitions.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen: HashSet<String> = definitions.iter().map(|d| d.id.clone()).collect();

        // Resume from an interrupted pass only when pinned to the same commit.
        let mut cursor: Option<String> = None;
        if let Some(checkpoint) = checkpoints.get(slug).await? {
            if checkpoint.repo_commit == report.commit {
                tracing::info!(
                    "⏳ Resuming sync for {} from runtime id {}",
                    slug,
                    checkpoint.runtime_cursor
                );
                cursor = Some(checkpoint.runtime_cursor);
                report.resumed = true;
            }
        }

        let mut processed_in_batch = 0usize;
        for def in &definitions {
            if let Some(cursor) = &cursor {
                if def.id.as_str() <= cursor.as_str() {
                    continue;
                }
            }

            // Short-circuit hint: unchanged modification marker means the
            // content hash cannot have changed. Missing rows are always
            // re-evaluated so reappearance is noticed.
            let existing = mappings.get(slug, &def.id).await?;
            if let Some(mapping) = &existing {
                if mapping.status != MappingStatus::Missing
                    && mapping.runtime_hash.is_some()
                    && def.updated_at.is_some()
                    && mapping.runtime_updated_at == def.updated_at
                {
                    report.skipped += 1;
                    continue;
                }
            }

            // One bad item never aborts the pass.
            if let Err(err) = self
                .reconcile_item(&mappings, &registry, slug, def, existing, report)
                .await
            {
                report
                    .errors
                    .push(format!("runtime object {}: {}", def.id, err));
            }

            processed_in_batch += 1;
            if processed_in_batch >= self.config.batch_size {
                checkpoints
                    .save(slug, &def.id, report.commit.as_deref())
                    .await?;
                processed_in_batch = 0;
            }
        }

        if let Some(cursor) = cursor {
            // Items before the resume cursor still exist in the runtime.
            seen.insert(cursor);
        }
        Ok(seen)
    }

    async fn reconcile_item(
        &self,
        mappings: &MappingStore,
        registry: &RegistryStore,
        slug: &str,
        def: &crate::adapters::RuntimeDefinition,
        existing: Option<Mapping>,
        report: &mut SyncReport,
    ) -> Result<(), ReconcileError> {
        let normalized = normalize(&def.body)
            .map_err(|e| ReconcileError::Internal(anyhow::anyhow!("normalize: {}", e)))?;

        let identity = resolve(mappings, registry, slug, &def.id, &normalized.content_hash).await?;

        let (event, registry_id) = match identity {
            Identity::Linked { registry_id } => (MappingEvent::ObservedLinked, Some(registry_id)),
            Identity::Unmapped => (MappingEvent::ObservedUnmapped, None),
            Identity::Conflict { detail, .. } => {
                report.conflicts.push(detail);
                (MappingEvent::ObservedUnmapped, None)
            }
        };

        let current = existing.as_ref().map(|m| m.status);
        let next = MappingStatus::transition(current, event)
            .map_err(|e| ReconcileError::InvalidTransition(e.to_string()))?;

        // Explicit opt-outs absorb observations without a write.
        if matches!(next, MappingStatus::Ignored | MappingStatus::Deleted) {
            return Ok(());
        }

        let repository_hash = match &registry_id {
            Some(id) => registry.get(id).await?.map(|e| e.content_hash),
            None => existing.as_ref().and_then(|m| m.repository_hash.clone()),
        };

        let now = Utc::now();
        let mut mapping = existing.unwrap_or_else(|| Mapping::new(slug, &def.id, next));
        mapping.status = next;
        if registry_id.is_some() {
            mapping.registry_id = registry_id;
        }
        mapping.name = Some(if def.name.is_empty() {
            normalized.name.clone()
        } else {
            def.name.clone()
        });
        mapping.runtime_hash = Some(normalized.content_hash);
        mapping.repository_hash = repository_hash;
        mapping.runtime_updated_at = def.updated_at.clone();
        mapping.last_synced_at = Some(now);
        mapping.updated_at = now;
        mappings.upsert(&mapping).await?;

        match next {
            MappingStatus::Linked => report.linked += 1,
            MappingStatus::Unmapped => report.unmapped += 1,
            _ => {}
        }
        Ok(())
    }

    async fn mark_disappeared(
        &self,
        pool: &SqlitePool,
        slug: &str,
        seen: &HashSet<String>,
        report: &mut SyncReport,
    ) -> Result<(), ReconcileError> {
        let mappings = MappingStore::new(pool.clone());

        for mapping in mappings.list_for_environment(slug).await? {
            if seen.contains(&mapping.runtime_id) {
                continue;
            }
            if !matches!(
                mapping.status,
                MappingStatus::Linked | MappingStatus::Unmapped
            ) {
                continue;
            }

            let next = MappingStatus::transition(Some(mapping.status), MappingEvent::Disappeared)
                .map_err(|e| ReconcileError::InvalidTransition(e.to_string()))?;
            let mut updated = mapping.clone();
            updated.status = next;
            updated.updated_at = Utc::now();
            mappings.upsert(&updated).await?;

            tracing::info!(
                "⚠️ Runtime object {} in {} disappeared; mapping marked missing",
                mapping.runtime_id,
                slug
            );
            report.disappeared += 1;
        }
        Ok(())
    }

    fn transient(&self, operation: &str, err: AdapterError) -> ReconcileError {
        ReconcileError::Transient {
            operation: operation.to_string(),
            attempts: self.retry.max_attempts,
            message: err.to_string(),
        }
    }
}
