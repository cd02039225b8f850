use crate::id::EntityId;
use crate::state::EntityState;
use hyper::Request;
use hyper::body::Bytes;
use monitoring::{Fetch, HandlerResult};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A live entity: its state plus the handler built for it.
pub struct EntityInstance<E> {
    state: Arc<EntityState>,
    entity: E,
    // Only one call runs inside an instance at a time
    gate: Mutex<()>,
}

impl<E: Fetch> EntityInstance<E> {
    pub(crate) fn new(state: Arc<EntityState>, entity: E) -> Self {
        Self {
            state,
            entity,
            gate: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &EntityId {
        self.state.id()
    }

    pub fn state(&self) -> &Arc<EntityState> {
        &self.state
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Calls the entity's handler. Errors are returned to the caller as is.
    pub async fn fetch(&self, request: Request<Bytes>) -> HandlerResult {
        let _gate = self.gate.lock().await;
        let result = self.entity.fetch(request).await;
        if let Err(e) = &result {
            tracing::debug!(entity_id = %self.id(), error = %e, "Entity call failed");
        }
        result
    }
}
