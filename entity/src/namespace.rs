use crate::errors::EntityError;
use crate::id::EntityId;
use crate::instance::EntityInstance;
use crate::metrics_defs::{ENTITIES_ACTIVE, ENTITIES_CREATED, ENTITY_CONSTRUCTION_FAILED};
use crate::state::EntityState;
use crate::stub::EntityStub;
use monitoring::Fetch;
use parking_lot::Mutex;
use shared::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the handler of a new entity instance from its state.
pub trait EntityFactory: Send + Sync + 'static {
    type Entity: Fetch + 'static;

    fn create(&self, state: Arc<EntityState>) -> Result<Self::Entity, EntityError>;
}

struct NamespaceInner<F: EntityFactory> {
    name: String,
    factory: F,
    instances: Mutex<HashMap<EntityId, Arc<EntityInstance<F::Entity>>>>,
}

/// Registry holding at most one instance per id.
///
/// Instances live as long as the namespace; nothing here evicts them.
pub struct EntityNamespace<F: EntityFactory> {
    inner: Arc<NamespaceInner<F>>,
}

impl<F: EntityFactory> Clone for EntityNamespace<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: EntityFactory> EntityNamespace<F> {
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            inner: Arc::new(NamespaceInner {
                name: name.into(),
                factory,
                instances: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    pub fn id_from_name(&self, name: &str) -> EntityId {
        EntityId::from_name(name)
    }

    pub fn id_from_string(&self, id: &str) -> Result<EntityId, EntityError> {
        EntityId::parse(id)
    }

    /// Returns a handle for `id`. No instance is created until the handle is called.
    pub fn get(&self, id: EntityId) -> EntityStub<F> {
        EntityStub::new(self.clone(), id)
    }

    /// The live instance for `id`, if one was created.
    pub fn instance(&self, id: &EntityId) -> Option<Arc<EntityInstance<F::Entity>>> {
        self.inner.instances.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for the deferred tasks of every live instance.
    pub async fn drain(&self) {
        let instances: Vec<_> = self.inner.instances.lock().values().cloned().collect();
        for instance in instances {
            instance.state().drain().await;
        }
    }

    pub(crate) fn get_or_create(
        &self,
        id: &EntityId,
    ) -> Result<Arc<EntityInstance<F::Entity>>, EntityError> {
        let mut instances = self.inner.instances.lock();
        if let Some(instance) = instances.get(id) {
            return Ok(instance.clone());
        }

        let state = Arc::new(EntityState::new(id.clone()));
        let entity = self.inner.factory.create(state.clone()).inspect_err(|e| {
            counter!(ENTITY_CONSTRUCTION_FAILED).increment(1);
            tracing::error!(namespace = %self.inner.name, entity_id = %id, error = %e, "Failed to construct entity");
        })?;

        let instance = Arc::new(EntityInstance::new(state, entity));
        instances.insert(id.clone(), instance.clone());

        counter!(ENTITIES_CREATED).increment(1);
        gauge!(ENTITIES_ACTIVE).set(instances.len() as f64);
        tracing::debug!(namespace = %self.inner.name, entity_id = %id, "Created entity instance");

        Ok(instance)
    }
}
