/// Mapping layer - stable identity for runtime objects
///
/// Runtime-assigned ids are unstable across environments; mappings give each
/// runtime object a stable registry identity, with a status state machine
/// governing every transition.

pub mod identity;
pub mod store;
pub mod types;

pub use identity::{resolve, Identity};
pub use store::MappingStore;
pub use types::{Mapping, MappingEvent, MappingStatus};
