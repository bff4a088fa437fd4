pub mod driver;
pub mod factory;
pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod stores;

pub use driver::{Document, EntityAccessor, ReadyState, StoreDriver, StoreHandle};
pub use factory::{EntitySet, ModelFactory};
pub use manager::{ConnectionCache, DatabaseError, TenantConnection};
pub use models::EntityName;
pub use stores::{ResolvedTenant, TenantResolver, TenantStores};
