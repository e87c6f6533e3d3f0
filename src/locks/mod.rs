/// Per-environment single-flight lock registry
///
/// Drift detection, sync, and promotion against the same environment must not
/// overlap: concurrent writers to the aggregate status rows produce
/// lost-update races. All three acquire a try-lock here; holders are rejected,
/// not queued, and the guard releases on drop so a panicking pass can never
/// leave an environment locked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-process registry of held (tenant, environment) locks.
///
/// The persistence store is the only shared mutable resource across
/// processes; this registry only serializes passes within one instance.
#[derive(Debug, Default)]
pub struct EnvLockRegistry {
    /// (tenant, environment) -> operation currently holding the lock
    held: Mutex<HashMap<(String, String), String>>,
}

/// RAII guard for an environment lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct EnvLockGuard {
    registry: Arc<EnvLockRegistry>,
    key: (String, String),
}

impl EnvLockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Try to acquire the lock for (tenant, environment).
    ///
    /// Returns `None` when another operation already holds it; the caller
    /// must skip or reject, never wait.
    pub fn try_acquire(
        self: &Arc<Self>,
        tenant: &str,
        environment: &str,
        operation: &str,
    ) -> Option<EnvLockGuard> {
        let key = (tenant.to_string(), environment.to_string());
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.contains_key(&key) {
            return None;
        }
        held.insert(key.clone(), operation.to_string());
        Some(EnvLockGuard {
            registry: Arc::clone(self),
            key,
        })
    }

    /// Operation currently holding the lock, for specific rejection messages.
    pub fn holder(&self, tenant: &str, environment: &str) -> Option<String> {
        let key = (tenant.to_string(), environment.to_string());
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }
}

impl Drop for EnvLockGuard {
    fn drop(&mut self) {
        let mut held = self
            .registry
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_guard_drops() {
        let registry = EnvLockRegistry::new();

        let guard = registry.try_acquire("default", "prod", "promotion").unwrap();
        assert!(registry.try_acquire("default", "prod", "drift-detection").is_none());
        assert_eq!(
            registry.holder("default", "prod").as_deref(),
            Some("promotion")
        );

        drop(guard);
        assert!(registry.try_acquire("default", "prod", "drift-detection").is_some());
    }

    #[test]
    fn locks_are_scoped_per_environment() {
        let registry = EnvLockRegistry::new();

        let _prod = registry.try_acquire("default", "prod", "sync").unwrap();
        assert!(registry.try_acquire("default", "staging", "sync").is_some());
        assert!(registry.try_acquire("acme", "prod", "sync").is_some());
    }
}
