use crate::id::EntityId;
use crate::namespace::{EntityFactory, EntityNamespace};
use hyper::Request;
use hyper::body::Bytes;
use monitoring::HandlerResult;

/// Routing handle for one entity id.
///
/// A stub does not own the instance; it resolves it on every call.
pub struct EntityStub<F: EntityFactory> {
    namespace: EntityNamespace<F>,
    id: EntityId,
}

impl<F: EntityFactory> EntityStub<F> {
    pub(crate) fn new(namespace: EntityNamespace<F>, id: EntityId) -> Self {
        Self { namespace, id }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Routes `request` to the entity, creating the instance on first use.
    pub async fn fetch(&self, request: Request<Bytes>) -> HandlerResult {
        let instance = self.namespace.get_or_create(&self.id)?;
        instance.fetch(request).await
    }
}
