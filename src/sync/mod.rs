/// Sync orchestration
///
/// The checkpointed, idempotent sync pass and the background scheduler that
/// drives it alongside drift detection and the incident TTL sweep.

pub mod checkpoints;
pub mod orchestrator;
pub mod scheduler;

pub use checkpoints::CheckpointStore;
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use scheduler::ReconcileScheduler;
