/// External system adapters
///
/// The reconciliation engine consumes two external APIs through capability traits:
/// the workflow runtime (`RuntimeAdapter`) and the version-control repository
/// (`RepositoryClient`). Normalizer and Identity Resolver depend only on
/// these interfaces; provider differences live behind the trait impls.

pub mod repository;
pub mod runtime;

#[cfg(test)]
pub mod mock;

use crate::config::RetryPolicy;
use crate::error::ReconcileError;
use crate::tenant::types::Environment;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Adapter-level failure, classified for retry decisions.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network failure, 429, or 5xx: worth a bounded retry with backoff
    #[error("transient failure in {operation} (status {status:?}): {message}")]
    Transient {
        operation: String,
        status: Option<u16>,
        message: String,
    },
    /// 4xx or malformed payload: retrying cannot help
    #[error("{operation} failed: {message}")]
    Permanent { operation: String, message: String },
    /// The referenced remote object does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient { .. })
    }
}

/// One workflow definition as the runtime reports it.
#[derive(Debug, Clone)]
pub struct RuntimeDefinition {
    /// Runtime-assigned id; unstable across environments
    pub id: String,
    pub name: String,
    /// Full raw definition body (nodes/edges/settings, credential refs)
    pub body: Value,
    /// Runtime-reported last-modified marker, if any
    pub updated_at: Option<String>,
}

/// One credential as the runtime reports it. Only the reference is ever
/// handled; secrets stay inside the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeCredential {
    pub id: String,
    pub name: String,
    /// Credential type slug (e.g. "postgres")
    pub kind: String,
}

/// Capability interface over one workflow runtime installation.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    async fn list_definitions(&self) -> Result<Vec<RuntimeDefinition>, AdapterError>;
    async fn get_definition(&self, id: &str) -> Result<RuntimeDefinition, AdapterError>;
    async fn create_definition(&self, body: &Value) -> Result<RuntimeDefinition, AdapterError>;
    async fn update_definition(&self, id: &str, body: &Value)
        -> Result<RuntimeDefinition, AdapterError>;
    async fn delete_definition(&self, id: &str) -> Result<(), AdapterError>;
    async fn list_credentials(&self) -> Result<Vec<RuntimeCredential>, AdapterError>;
}

/// Capability interface over the version-controlled source of truth.
///
/// Reads always pass an explicit commit: drift comparisons are pinned to a
/// recorded commit identifier, never an implicit "latest".
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    async fn resolve_branch_head(&self, branch: &str) -> Result<String, AdapterError>;
    async fn list_files(&self, path: &str, commit: &str) -> Result<Vec<String>, AdapterError>;
    async fn read_file(&self, path: &str, commit: &str) -> Result<String, AdapterError>;
    async fn commit_file(
        &self,
        path: &str,
        branch: &str,
        content: &str,
        message: &str,
    ) -> Result<String, AdapterError>;
}

/// Builds adapters for an environment from its stored configuration.
///
/// Injected at startup; tests swap in mock factories.
pub trait AdapterFactory: Send + Sync {
    fn runtime(&self, environment: &Environment) -> Result<Arc<dyn RuntimeAdapter>, ReconcileError>;
    fn repository(
        &self,
        environment: &Environment,
    ) -> Result<Arc<dyn RepositoryClient>, ReconcileError>;
}

/// Production factory building reqwest-backed adapters.
///
/// API tokens are read from the env vars named in the environment config;
/// the secrets themselves are never persisted.
pub struct HttpAdapterFactory {
    client: reqwest::Client,
}

impl HttpAdapterFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn runtime(&self, environment: &Environment) -> Result<Arc<dyn RuntimeAdapter>, ReconcileError> {
        let api_key = std::env::var(&environment.runtime.api_key_env).map_err(|_| {
            ReconcileError::Configuration {
                environment: environment.slug.clone(),
                what: format!("runtime API key env var '{}'", environment.runtime.api_key_env),
            }
        })?;
        Ok(Arc::new(runtime::HttpRuntimeAdapter::new(
            self.client.clone(),
            environment.runtime.base_url.clone(),
            api_key,
        )))
    }

    fn repository(
        &self,
        environment: &Environment,
    ) -> Result<Arc<dyn RepositoryClient>, ReconcileError> {
        let repo = environment
            .repository
            .as_ref()
            .ok_or_else(|| ReconcileError::Configuration {
                environment: environment.slug.clone(),
                what: "repository location".to_string(),
            })?;
        let token = std::env::var(&repo.token_env).map_err(|_| ReconcileError::Configuration {
            environment: environment.slug.clone(),
            what: format!("repository token env var '{}'", repo.token_env),
        })?;
        Ok(Arc::new(repository::HttpRepositoryClient::new(
            self.client.clone(),
            repo.base_url.clone(),
            repo.repo.clone(),
            token,
        )))
    }
}

/// Bounded retry with exponential backoff for transient adapter failures.
///
/// Permanent failures and not-found are returned immediately; the final
/// transient failure is returned to the caller, which maps it into the
/// `error` aggregate with last-known metadata retained.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.base_delay_ms.saturating_mul(1 << (attempt - 1));
                tracing::warn!(
                    "⏳ {} attempt {}/{} failed ({}); retrying in {}ms",
                    operation,
                    attempt,
                    policy.max_attempts,
                    err,
                    delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        };
        let calls = AtomicU32::new(0);

        let result = with_retry(&policy, "probe", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::Transient {
                        operation: "probe".to_string(),
                        status: Some(503),
                        message: "unavailable".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1,
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "probe", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AdapterError::Permanent {
                    operation: "probe".to_string(),
                    message: "bad request".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "probe", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AdapterError::Transient {
                    operation: "probe".to_string(),
                    status: None,
                    message: "timeout".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
