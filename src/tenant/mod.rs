/// Tenant layer - per-tenant database isolation and environment registry
///
/// Tenant/user/billing management is external; this layer only scopes
/// storage and configuration per tenant.

pub mod database;
pub mod environments;
pub mod types;

pub use database::TenantDatabaseManager;
pub use environments::{EnvironmentRegistry, EnvironmentStore};
pub use types::{Environment, RepositoryEndpoint, RuntimeEndpoint};
