//! Organization-isolated read model storage abstractions.

pub mod org_store;

pub use org_store::{InMemoryOrgStore, OrgStore};
