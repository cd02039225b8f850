//! Per-identifier entities.
//!
//! An [`EntityNamespace`] maps ids to long-lived [`EntityInstance`]s. Callers
//! derive an id, get an [`EntityStub`] for it and call `fetch` on the stub;
//! the instance is created by the namespace's [`EntityFactory`] on the first
//! call that reaches it and reused from then on.

mod errors;
mod id;
mod instance;
pub mod metrics_defs;
mod namespace;
mod state;
mod stub;

pub use errors::EntityError;
pub use id::EntityId;
pub use instance::EntityInstance;
pub use namespace::{EntityFactory, EntityNamespace};
pub use state::EntityState;
pub use stub::EntityStub;
