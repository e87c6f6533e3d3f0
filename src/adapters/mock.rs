/// In-memory mock adapters for tests
///
/// Deterministic doubles for the runtime and repository APIs, with failure
/// injection knobs for transient-error and mid-write-failure scenarios.

use crate::adapters::{
    AdapterError, AdapterFactory, RepositoryClient, RuntimeAdapter, RuntimeCredential,
    RuntimeDefinition,
};
use crate::error::ReconcileError;
use crate::tenant::types::Environment;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock workflow runtime over an in-memory definition table.
#[derive(Debug, Default)]
pub struct MockRuntime {
    definitions: Mutex<BTreeMap<String, RuntimeDefinition>>,
    credentials: Mutex<Vec<RuntimeCredential>>,
    fail_listing: AtomicBool,
    /// Definition id whose next write fails (mid-promotion failure injection)
    fail_write_on: Mutex<Option<String>>,
    /// Definition name whose create fails (for not-yet-existing targets)
    fail_create_named: Mutex<Option<String>>,
    next_id: AtomicUsize,
    /// Chronological log of mutating calls, for ordering assertions
    pub write_log: Mutex<Vec<String>>,
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_definition(&self, id: &str, body: Value, updated_at: Option<&str>) {
        let name = body
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        self.definitions.lock().unwrap().insert(
            id.to_string(),
            RuntimeDefinition {
                id: id.to_string(),
                name,
                body,
                updated_at: updated_at.map(str::to_string),
            },
        );
    }

    pub fn remove_definition(&self, id: &str) {
        self.definitions.lock().unwrap().remove(id);
    }

    pub fn seed_credential(&self, id: &str, name: &str, kind: &str) {
        self.credentials.lock().unwrap().push(RuntimeCredential {
            id: id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
        });
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_write_on(&self, id: &str) {
        *self.fail_write_on.lock().unwrap() = Some(id.to_string());
    }

    pub fn fail_create_named(&self, name: &str) {
        *self.fail_create_named.lock().unwrap() = Some(name.to_string());
    }

    pub fn definition_body(&self, id: &str) -> Option<Value> {
        self.definitions
            .lock()
            .unwrap()
            .get(id)
            .map(|d| d.body.clone())
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.lock().unwrap().len()
    }
}

#[async_trait]
impl RuntimeAdapter for MockRuntime {
    async fn list_definitions(&self) -> Result<Vec<RuntimeDefinition>, AdapterError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AdapterError::Transient {
                operation: "list definitions".to_string(),
                status: Some(503),
                message: "mock runtime down".to_string(),
            });
        }
        Ok(self.definitions.lock().unwrap().values().cloned().collect())
    }

    async fn get_definition(&self, id: &str) -> Result<RuntimeDefinition, AdapterError> {
        self.definitions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(format!("definition {}", id)))
    }

    async fn create_definition(&self, body: &Value) -> Result<RuntimeDefinition, AdapterError> {
        let name = body
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        if self.fail_create_named.lock().unwrap().as_deref() == Some(name.as_str()) {
            return Err(AdapterError::Permanent {
                operation: format!("create definition '{}'", name),
                message: "mock create failure".to_string(),
            });
        }

        let id = format!("gen-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let definition = RuntimeDefinition {
            id: id.clone(),
            name,
            body: body.clone(),
            updated_at: None,
        };
        self.definitions
            .lock()
            .unwrap()
            .insert(id.clone(), definition.clone());
        self.write_log.lock().unwrap().push(format!("create {}", id));
        Ok(definition)
    }

    async fn update_definition(
        &self,
        id: &str,
        body: &Value,
    ) -> Result<RuntimeDefinition, AdapterError> {
        if self.fail_write_on.lock().unwrap().as_deref() == Some(id) {
            return Err(AdapterError::Permanent {
                operation: format!("update definition {}", id),
                message: "mock write failure".to_string(),
            });
        }

        let mut definitions = self.definitions.lock().unwrap();
        let existing = definitions
            .get_mut(id)
            .ok_or_else(|| AdapterError::NotFound(format!("definition {}", id)))?;
        existing.body = body.clone();
        existing.name = body
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or(&existing.name)
            .to_string();
        self.write_log.lock().unwrap().push(format!("update {}", id));
        Ok(existing.clone())
    }

    async fn delete_definition(&self, id: &str) -> Result<(), AdapterError> {
        self.definitions
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| AdapterError::NotFound(format!("definition {}", id)))?;
        self.write_log.lock().unwrap().push(format!("delete {}", id));
        Ok(())
    }

    async fn list_credentials(&self) -> Result<Vec<RuntimeCredential>, AdapterError> {
        Ok(self.credentials.lock().unwrap().clone())
    }
}

/// Mock repository: content addressed by (commit, path).
#[derive(Debug, Default)]
pub struct MockRepository {
    head: Mutex<String>,
    files: Mutex<HashMap<(String, String), String>>,
    fail: AtomicBool,
    commit_counter: AtomicUsize,
}

impl MockRepository {
    pub fn new(head: &str) -> Arc<Self> {
        let repo = Self::default();
        *repo.head.lock().unwrap() = head.to_string();
        Arc::new(repo)
    }

    pub fn set_head(&self, commit: &str) {
        *self.head.lock().unwrap() = commit.to_string();
    }

    pub fn put_file(&self, commit: &str, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert((commit.to_string(), path.to_string()), content.to_string());
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<(), AdapterError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdapterError::Transient {
                operation: operation.to_string(),
                status: Some(502),
                message: "mock repository down".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryClient for MockRepository {
    async fn resolve_branch_head(&self, _branch: &str) -> Result<String, AdapterError> {
        self.check("resolve branch head")?;
        Ok(self.head.lock().unwrap().clone())
    }

    async fn list_files(&self, path: &str, commit: &str) -> Result<Vec<String>, AdapterError> {
        self.check("list files")?;
        let files = self.files.lock().unwrap();
        let mut paths: Vec<String> = files
            .keys()
            .filter(|(c, p)| c == commit && p.starts_with(path) && p.ends_with(".json"))
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn read_file(&self, path: &str, commit: &str) -> Result<String, AdapterError> {
        self.check("read file")?;
        self.files
            .lock()
            .unwrap()
            .get(&(commit.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(format!("{} at {}", path, commit)))
    }

    async fn commit_file(
        &self,
        path: &str,
        _branch: &str,
        content: &str,
        _message: &str,
    ) -> Result<String, AdapterError> {
        self.check("commit file")?;
        let commit = format!("mock-c{}", self.commit_counter.fetch_add(1, Ordering::SeqCst) + 1);

        // Carry previous head's files forward, then apply the change.
        let previous = self.head.lock().unwrap().clone();
        let mut files = self.files.lock().unwrap();
        let carried: Vec<(String, String)> = files
            .iter()
            .filter(|((c, _), _)| *c == previous)
            .map(|((_, p), content)| (p.clone(), content.clone()))
            .collect();
        for (p, c) in carried {
            files.insert((commit.clone(), p), c);
        }
        files.insert((commit.clone(), path.to_string()), content.to_string());
        drop(files);

        *self.head.lock().unwrap() = commit.clone();
        Ok(commit)
    }
}

/// Factory wiring mock adapters to environments by slug.
#[derive(Default)]
pub struct MockAdapterFactory {
    runtimes: HashMap<String, Arc<MockRuntime>>,
    repositories: HashMap<String, Arc<MockRepository>>,
}

impl MockAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(mut self, slug: &str, runtime: Arc<MockRuntime>) -> Self {
        self.runtimes.insert(slug.to_string(), runtime);
        self
    }

    pub fn with_repository(mut self, slug: &str, repository: Arc<MockRepository>) -> Self {
        self.repositories.insert(slug.to_string(), repository);
        self
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn runtime(&self, environment: &Environment) -> Result<Arc<dyn RuntimeAdapter>, ReconcileError> {
        self.runtimes
            .get(&environment.slug)
            .cloned()
            .map(|r| r as Arc<dyn RuntimeAdapter>)
            .ok_or_else(|| ReconcileError::Configuration {
                environment: environment.slug.clone(),
                what: "runtime endpoint".to_string(),
            })
    }

    fn repository(
        &self,
        environment: &Environment,
    ) -> Result<Arc<dyn RepositoryClient>, ReconcileError> {
        if environment.repository.is_none() {
            return Err(ReconcileError::Configuration {
                environment: environment.slug.clone(),
                what: "repository location".to_string(),
            });
        }
        self.repositories
            .get(&environment.slug)
            .cloned()
            .map(|r| r as Arc<dyn RepositoryClient>)
            .ok_or_else(|| ReconcileError::Configuration {
                environment: environment.slug.clone(),
                what: "repository location".to_string(),
            })
    }
}
