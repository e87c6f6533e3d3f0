/// Identity Resolver
///
/// Determines the registry identity of a runtime object from its normalized
/// content hash. Deterministic and side-effect-free: all persistence is
/// performed by the caller.

use crate::mapping::store::MappingStore;
use crate::registry::RegistryStore;
use anyhow::Result;

/// Outcome of identity resolution for one runtime object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Bound to a registry entry (prior mapping or successful auto-link)
    Linked { registry_id: String },
    /// No identity yet; onboarding is an explicit operator step
    Unmapped,
    /// Auto-link blocked: ambiguous hash or the target registry entry is
    /// already live-linked to a different runtime object
    Conflict {
        registry_id: Option<String>,
        detail: String,
    },
}

/// Resolve the registry identity for (environment, runtime_id, hash).
///
/// Precedence:
/// 1. An existing mapping row with a registry id always wins; prior explicit
///    or auto linkage is never overridden by hash.
/// 2. Otherwise, registry entries matching the content hash: auto-link only
///    when exactly one matches. Two or more matches is a hash ambiguity and
///    blocks only this item.
/// 3. A unique match already live-linked to a *different* runtime id in the
///    same environment is a Conflict — never a duplicate link.
pub async fn resolve(
    mappings: &MappingStore,
    registry: &RegistryStore,
    environment: &str,
    runtime_id: &str,
    normalized_hash: &str,
) -> Result<Identity> {
    if let Some(existing) = mappings.get(environment, runtime_id).await? {
        if let Some(registry_id) = existing.registry_id {
            return Ok(Identity::Linked { registry_id });
        }
        // A row without a registry id (unmapped, or missing and reappearing)
        // falls through to hash matching for a fresh evaluation.
    }

    let matches = registry.find_by_hash(normalized_hash).await?;
    match matches.len() {
        0 => Ok(Identity::Unmapped),
        1 => {
            let entry = &matches[0];
            match mappings.find_live_by_registry(environment, &entry.id).await? {
                Some(bound) if bound.runtime_id != runtime_id => {
                    tracing::warn!(
                        "⚠️ Auto-link conflict in '{}': registry entry {} ('{}') already bound to runtime object {}",
                        environment,
                        entry.id,
                        entry.name,
                        bound.runtime_id
                    );
                    Ok(Identity::Conflict {
                        registry_id: Some(entry.id.clone()),
                        detail: format!(
                            "registry entry '{}' ({}) is already linked to runtime object '{}' in environment '{}'",
                            entry.name, entry.id, bound.runtime_id, environment
                        ),
                    })
                }
                _ => Ok(Identity::Linked {
                    registry_id: entry.id.clone(),
                }),
            }
        }
        n => {
            let names: Vec<&str> = matches.iter().map(|e| e.name.as_str()).collect();
            tracing::warn!(
                "⚠️ Hash ambiguity for runtime object {} in '{}': {} registry entries share hash {}",
                runtime_id,
                environment,
                n,
                normalized_hash
            );
            Ok(Identity::Conflict {
                registry_id: None,
                detail: format!(
                    "content hash {} is shared by {} registry entries ({}); cannot auto-link runtime object '{}'",
                    normalized_hash,
                    n,
                    names.join(", "),
                    runtime_id
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::types::{Mapping, MappingStatus};
    use crate::tenant::database::TenantDatabaseManager;
    use serde_json::json;
    use tempfile::TempDir;

    async fn stores(dir: &TempDir) -> (MappingStore, RegistryStore) {
        let pool = TenantDatabaseManager::new(dir.path().to_string_lossy().to_string())
            .tenant_pool("default")
            .await
            .unwrap();
        (MappingStore::new(pool.clone()), RegistryStore::new(pool))
    }

    #[tokio::test]
    async fn existing_mapping_wins_over_hash() {
        let dir = TempDir::new().unwrap();
        let (mappings, registry) = stores(&dir).await;

        // A registry entry exists whose hash would auto-link elsewhere...
        let other = registry
            .upsert_from_repository("flows/other.json", "main", "c1", "other", "h-x", &json!({}))
            .await
            .unwrap();

        // ...but the runtime object already has an explicit link.
        let mut mapping = Mapping::new("prod", "rt-1", MappingStatus::Linked);
        mapping.registry_id = Some("reg-explicit".to_string());
        mappings.upsert(&mapping).await.unwrap();

        let identity = resolve(&mappings, &registry, "prod", "rt-1", "h-x")
            .await
            .unwrap();
        assert_eq!(
            identity,
            Identity::Linked {
                registry_id: "reg-explicit".to_string()
            }
        );
        assert_ne!(other.id, "reg-explicit");
    }

    #[tokio::test]
    async fn unique_hash_match_auto_links() {
        let dir = TempDir::new().unwrap();
        let (mappings, registry) = stores(&dir).await;

        let entry = registry
            .upsert_from_repository("flows/a.json", "main", "c1", "a", "h-1", &json!({}))
            .await
            .unwrap();

        let identity = resolve(&mappings, &registry, "prod", "rt-1", "h-1")
            .await
            .unwrap();
        assert_eq!(identity, Identity::Linked { registry_id: entry.id });
    }

    #[tokio::test]
    async fn no_match_is_unmapped() {
        let dir = TempDir::new().unwrap();
        let (mappings, registry) = stores(&dir).await;

        let identity = resolve(&mappings, &registry, "prod", "rt-1", "h-none")
            .await
            .unwrap();
        assert_eq!(identity, Identity::Unmapped);
    }

    #[tokio::test]
    async fn double_bind_returns_conflict() {
        let dir = TempDir::new().unwrap();
        let (mappings, registry) = stores(&dir).await;

        let entry = registry
            .upsert_from_repository("flows/a.json", "main", "c1", "a", "h-1", &json!({}))
            .await
            .unwrap();

        let mut bound = Mapping::new("prod", "rt-live", MappingStatus::Linked);
        bound.registry_id = Some(entry.id.clone());
        mappings.upsert(&bound).await.unwrap();

        let identity = resolve(&mappings, &registry, "prod", "rt-other", "h-1")
            .await
            .unwrap();
        match identity {
            Identity::Conflict { registry_id, detail } => {
                assert_eq!(registry_id.as_deref(), Some(entry.id.as_str()));
                assert!(detail.contains("rt-live"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_binding_does_not_block_relink() {
        let dir = TempDir::new().unwrap();
        let (mappings, registry) = stores(&dir).await;

        let entry = registry
            .upsert_from_repository("flows/a.json", "main", "c1", "a", "h-1", &json!({}))
            .await
            .unwrap();

        // The previous binding went missing; a reappearing object may claim it.
        let mut stale = Mapping::new("prod", "rt-old", MappingStatus::Missing);
        stale.registry_id = Some(entry.id.clone());
        mappings.upsert(&stale).await.unwrap();

        let identity = resolve(&mappings, &registry, "prod", "rt-new", "h-1")
            .await
            .unwrap();
        assert_eq!(identity, Identity::Linked { registry_id: entry.id });
    }

    #[tokio::test]
    async fn ambiguous_hash_returns_conflict() {
        let dir = TempDir::new().unwrap();
        let (mappings, registry) = stores(&dir).await;

        registry
            .upsert_from_repository("flows/a.json", "main", "c1", "a", "dup", &json!({}))
            .await
            .unwrap();
        registry
            .upsert_from_repository("flows/b.json", "main", "c1", "b", "dup", &json!({}))
            .await
            .unwrap();

        let identity = resolve(&mappings, &registry, "prod", "rt-1", "dup")
            .await
            .unwrap();
        assert!(matches!(identity, Identity::Conflict { registry_id: None, .. }));
    }
}
