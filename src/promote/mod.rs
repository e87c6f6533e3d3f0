/// Cross-environment promotion
///
/// Snapshot-guarded, all-or-nothing copying of definitions between
/// environments, with credential references rewritten by logical name.

pub mod executor;
pub mod snapshots;
pub mod types;

pub use executor::PromotionExecutor;
pub use snapshots::{SnapshotKind, SnapshotStore};
pub use types::{ItemOutcome, ItemStatus, PromotionRequest, PromotionResult, PromotionStatus};
