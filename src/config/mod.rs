/// Configuration management for the Driftway engine
///
/// Handles server configuration, tenant databases, background schedules,
/// retry policy, and incident/promotion policies.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Background loop schedules
    pub schedules: ScheduleConfig,
    /// Retry policy for runtime/repository calls
    pub retry: RetryPolicy,
    /// Drift-incident lifecycle policy
    pub incidents: IncidentPolicy,
    /// Promotion policy
    pub promotions: PromotionPolicy,
    /// Sync orchestrator tuning
    pub sync: SyncConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for tenant-isolated storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base directory for all tenant databases (default: "data")
    /// Creates: {data_dir}/{tenant}/governance.db
    pub data_dir: String,
    /// Tenants served by this instance. Tenant/user management itself is
    /// external; this list only scopes the background loops.
    pub tenants: Vec<String>,
}

/// Cron schedules for the independent background loops.
///
/// Each loop is an explicit scheduler job with its own schedule and last-run
/// timestamp; there is no ambient global scheduler state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Sync orchestrator schedule (6-field cron, default every 5 minutes)
    pub sync_cron: String,
    /// Drift detection schedule (default every 2 minutes)
    pub drift_cron: String,
    /// Incident TTL sweep schedule (default every 10 minutes)
    pub sweep_cron: String,
}

/// Bounded retry with exponential backoff for transient adapter failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one
    pub max_attempts: u32,
    /// Base delay in milliseconds, doubled per attempt
    pub base_delay_ms: u64,
}

/// Drift-incident lifecycle policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IncidentPolicy {
    /// SLA window: hours until an open incident is marked breached
    pub ttl_hours: i64,
    /// Duplicate-incident suppression window in hours
    pub dedupe_window_hours: i64,
}

/// Promotion policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PromotionPolicy {
    /// Whether a missing target credential may be left as a name-only
    /// placeholder instead of failing the item
    pub allow_credential_placeholders: bool,
}

/// Sync orchestrator tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Runtime items processed between checkpoints
    pub batch_size: usize,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("DRIFTWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("DRIFTWAY_PORT")
                    .unwrap_or_else(|_| "3010".to_string())
                    .parse()
                    .unwrap_or(3010),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("DRIFTWAY_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
                tenants: std::env::var("DRIFTWAY_TENANTS")
                    .map(|raw| {
                        raw.split(',')
                            .map(|t| t.trim().to_string())
                            .filter(|t| !t.is_empty())
                            .collect()
                    })
                    .unwrap_or_else(|_| vec!["default".to_string()]),
            },
            schedules: ScheduleConfig {
                sync_cron: std::env::var("DRIFTWAY_SYNC_CRON")
                    .unwrap_or_else(|_| "0 */5 * * * *".to_string()),
                drift_cron: std::env::var("DRIFTWAY_DRIFT_CRON")
                    .unwrap_or_else(|_| "0 */2 * * * *".to_string()),
                sweep_cron: std::env::var("DRIFTWAY_SWEEP_CRON")
                    .unwrap_or_else(|_| "0 */10 * * * *".to_string()),
            },
            retry: RetryPolicy {
                max_attempts: std::env::var("DRIFTWAY_RETRY_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3),
                base_delay_ms: std::env::var("DRIFTWAY_RETRY_BASE_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(250),
            },
            incidents: IncidentPolicy {
                ttl_hours: std::env::var("DRIFTWAY_INCIDENT_TTL_HOURS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(72),
                dedupe_window_hours: std::env::var("DRIFTWAY_INCIDENT_DEDUPE_HOURS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(24),
            },
            promotions: PromotionPolicy {
                allow_credential_placeholders: std::env::var("DRIFTWAY_ALLOW_CRED_PLACEHOLDERS")
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            },
            sync: SyncConfig {
                batch_size: std::env::var("DRIFTWAY_SYNC_BATCH_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(50),
            },
        }
    }
}
