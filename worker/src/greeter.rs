use crate::env::EntityEnv;
use crate::upstream::Upstream;
use async_trait::async_trait;
use entity::{EntityError, EntityFactory, EntityId, EntityState};
use hyper::body::Bytes;
use hyper::{Request, Response};
use monitoring::{
    Fetch, HandlerError, HandlerResult, InstrumentedFetch, MonitorBackend, MonitorConfig,
    create_fetch_with_monitor, trace_data,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const ENTITY_ID_HEADER: &str = "x-entity-id";
pub const ENTITY_CALLS_HEADER: &str = "x-entity-calls";

type EntityOptions = fn(&EntityEnv) -> MonitorConfig;

fn entity_options(env: &EntityEnv) -> MonitorConfig {
    env.monitoring.clone()
}

pub struct GreeterFactory {
    env: EntityEnv,
    backend: Arc<dyn MonitorBackend>,
}

impl GreeterFactory {
    pub fn new(env: EntityEnv, backend: Arc<dyn MonitorBackend>) -> Self {
        GreeterFactory { env, backend }
    }
}

impl EntityFactory for GreeterFactory {
    type Entity = GreeterEntity;

    fn create(&self, state: Arc<EntityState>) -> Result<GreeterEntity, EntityError> {
        let greeter = Greeter {
            id: state.id().clone(),
            upstream: self.env.upstream.clone(),
            calls: AtomicU64::new(0),
        };

        Ok(GreeterEntity {
            fetch: create_fetch_with_monitor(
                greeter,
                entity_options as EntityOptions,
                self.backend.clone(),
                self.env.clone(),
                state,
            ),
        })
    }
}

/// Entity answering every request with a greeting and its call count.
pub struct GreeterEntity {
    fetch: InstrumentedFetch<EntityEnv, Greeter, EntityOptions>,
}

#[async_trait]
impl Fetch for GreeterEntity {
    async fn fetch(&self, request: Request<Bytes>) -> HandlerResult {
        self.fetch.fetch(request).await
    }
}

struct Greeter {
    id: EntityId,
    upstream: Option<Upstream>,
    calls: AtomicU64,
}

#[async_trait]
impl Fetch for Greeter {
    async fn fetch(&self, _request: Request<Bytes>) -> HandlerResult {
        if let Some(upstream) = &self.upstream {
            upstream.call(&trace_data()).await?;
        }

        let calls = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        Response::builder()
            .header(ENTITY_ID_HEADER, self.id.as_str())
            .header(ENTITY_CALLS_HEADER, calls)
            .body(Bytes::from_static(b"Hello world!"))
            .map_err(|e| HandlerError::Internal(format!("failed to build response: {e}")))
    }
}
