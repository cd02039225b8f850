use crate::id::EntityId;
use monitoring::{DeferredTask, TaskRegistry, WaitUntil};

/// The context owned by one entity instance.
///
/// Deferred tasks submitted here outlive the call that submitted them and are
/// awaited by [`EntityState::drain`].
pub struct EntityState {
    id: EntityId,
    tasks: TaskRegistry,
}

impl EntityState {
    pub(crate) fn new(id: EntityId) -> Self {
        Self {
            id,
            tasks: TaskRegistry::new(),
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Number of deferred tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_idle()
    }

    pub async fn drain(&self) {
        self.tasks.drain().await;
        tracing::trace!(entity_id = %self.id, "Drained deferred tasks");
    }
}

impl WaitUntil for EntityState {
    fn wait_until(&self, task: DeferredTask) {
        tracing::trace!(entity_id = %self.id, "Deferred task submitted");
        self.tasks.wait_until(task);
    }
}
