use crate::env::WorkerEnv;
use async_trait::async_trait;
use entity::EntityFactory;
use hyper::Request;
use hyper::body::Bytes;
use monitoring::{
    ExecutionContext, ExportedFetch, HandlerResult, Instrumented, MonitorBackend, MonitorConfig,
    trace_data, with_monitor,
};
use std::sync::Arc;

/// Routes every request to the entity named by its path.
///
/// The request is forwarded unchanged apart from the trace headers, and the
/// entity's response is returned as is.
pub struct FrontDispatcher;

#[async_trait]
impl<F: EntityFactory> ExportedFetch<WorkerEnv<F>> for FrontDispatcher {
    async fn fetch(
        &self,
        mut request: Request<Bytes>,
        env: &WorkerEnv<F>,
        _ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        let trace = trace_data();
        if let Some(upstream) = &env.upstream {
            upstream.call(&trace).await?;
        }

        let name = entity_name(request.uri().path());
        let stub = env.entities.get(env.entities.id_from_name(&name));

        trace.apply_to(request.headers_mut());
        tracing::debug!(
            namespace = env.entities.name(),
            entity = %name,
            entity_id = %stub.id(),
            "Dispatching request to entity"
        );

        stub.fetch(request).await
    }
}

/// Canonical entity name for a request path.
///
/// Repeated and trailing slashes are dropped, so `//a/` and `/a` reach the
/// same entity. The root path, including an empty one, maps to `/`.
pub fn entity_name(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

pub type DispatcherOptions<F> = fn(&WorkerEnv<F>) -> MonitorConfig;

fn dispatcher_options<F: EntityFactory>(env: &WorkerEnv<F>) -> MonitorConfig {
    env.monitoring.clone()
}

/// The front dispatcher wrapped with monitoring, configured from `env.monitoring`.
pub fn instrumented_dispatcher<F: EntityFactory>(
    backend: Arc<dyn MonitorBackend>,
) -> Instrumented<WorkerEnv<F>, FrontDispatcher, DispatcherOptions<F>> {
    with_monitor(
        dispatcher_options::<F> as DispatcherOptions<F>,
        backend,
        FrontDispatcher,
    )
}
