use crate::config::Config;
use crate::greeter::GreeterFactory;
use crate::upstream::Upstream;
use entity::{EntityFactory, EntityNamespace};
use monitoring::{MonitorBackend, MonitorConfig};
use std::sync::Arc;

/// Bindings available to the front dispatcher on every request.
pub struct WorkerEnv<F: EntityFactory> {
    pub entities: EntityNamespace<F>,
    pub monitoring: MonitorConfig,
    pub upstream: Option<Upstream>,
}

impl<F: EntityFactory> Clone for WorkerEnv<F> {
    fn clone(&self) -> Self {
        Self {
            entities: self.entities.clone(),
            monitoring: self.monitoring.clone(),
            upstream: self.upstream.clone(),
        }
    }
}

impl WorkerEnv<GreeterFactory> {
    pub fn from_config(config: &Config, backend: Arc<dyn MonitorBackend>) -> Self {
        let entity_env = EntityEnv {
            monitoring: config.entity_monitoring(),
            upstream: config.entity.upstream.as_ref().map(Upstream::new),
        };

        WorkerEnv {
            entities: EntityNamespace::new(
                config.entity.namespace.clone(),
                GreeterFactory::new(entity_env, backend),
            ),
            monitoring: config.monitoring.clone(),
            upstream: config.upstream.as_ref().map(Upstream::new),
        }
    }
}

/// Bindings an entity handler sees.
#[derive(Clone, Debug, Default)]
pub struct EntityEnv {
    pub monitoring: MonitorConfig,
    pub upstream: Option<Upstream>,
}
