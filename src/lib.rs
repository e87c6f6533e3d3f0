/// Driftway: governance and reconciliation engine for workflow definitions
///
/// Driftway sits beside an external automation runtime and its git-backed
/// definition repositories, keeps a registry of governed identities, detects
/// drift between the two sides, manages drift incidents through a governed
/// lifecycle, and promotes definitions between environments with rollback.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every component
pub mod error;

// Tenant isolation layer - per-tenant databases and environment registry
pub mod tenant;

// Canonical normalization and content hashing of definitions
pub mod normalize;

// Governed identity registry (registry id <-> repository path)
pub mod registry;

// Runtime-object-to-registry mappings and their status state machine
pub mod mapping;

// Runtime and repository adapters (HTTP implementations plus test mocks)
pub mod adapters;

// Drift detection and incident lifecycle
pub mod drift;

// Checkpointed sync orchestration and the background scheduler
pub mod sync;

// Promotion execution with snapshots and rollback
pub mod promote;

// Per-environment single-flight locks
pub mod locks;

// In-process reconciliation event bus
pub mod events;

// HTTP API layer - REST endpoints and the SSE event stream
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use drift::{DriftIncident, DriftStatus, DriftSummary};
pub use error::ReconcileError;
pub use mapping::{Mapping, MappingStatus};
pub use server::start_server;
