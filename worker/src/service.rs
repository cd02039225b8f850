use crate::context::RequestContext;
use crate::dispatcher::{DispatcherOptions, FrontDispatcher, instrumented_dispatcher};
use crate::env::WorkerEnv;
use crate::errors::WorkerError;
use crate::metrics_defs::{DEFERRED_DRAINS, REQUEST_DURATION, REQUESTS_INFLIGHT};
use entity::EntityFactory;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use monitoring::{ExportedFetch, Instrumented, MonitorBackend};
use shared::http::{boxed, make_error_response};
use shared::{counter, gauge, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

struct ServiceInner<F: EntityFactory> {
    handler: Instrumented<WorkerEnv<F>, FrontDispatcher, DispatcherOptions<F>>,
    env: WorkerEnv<F>,
}

/// Serves the instrumented front dispatcher over HTTP.
pub struct WorkerService<F: EntityFactory> {
    inner: Arc<ServiceInner<F>>,
}

impl<F: EntityFactory> WorkerService<F> {
    pub fn new(env: WorkerEnv<F>, backend: Arc<dyn MonitorBackend>) -> Self {
        WorkerService {
            inner: Arc::new(ServiceInner {
                handler: instrumented_dispatcher(backend),
                env,
            }),
        }
    }
}

impl<F: EntityFactory> Service<Request<Incoming>> for WorkerService<F> {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = WorkerError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read request body");
                    return Ok(boxed(make_error_response(StatusCode::BAD_REQUEST)));
                }
            };

            let request = Request::from_parts(parts, body);
            Ok(boxed(dispatch(&inner.handler, &inner.env, request).await))
        })
    }
}

/// Runs `handler` for one request with a fresh [`RequestContext`].
///
/// A handler error becomes a 500 response, or a 502 if the handler asked for
/// exception pass-through. Deferred tasks still running when the response is
/// ready are drained in the background.
pub async fn dispatch<Env, H>(handler: &H, env: &Env, request: Request<Bytes>) -> Response<Bytes>
where
    Env: Send + Sync,
    H: ExportedFetch<Env>,
{
    let start = Instant::now();
    let inflight = InflightGuard::new();

    let ctx = Arc::new(RequestContext::new());
    let response = match handler.fetch(request, env, ctx.as_ref()).await {
        Ok(response) => response,
        Err(e) => {
            let status = match ctx.passes_through() {
                true => StatusCode::BAD_GATEWAY,
                false => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::warn!(error = %e, %status, "Request failed");
            make_error_response(status)
        }
    };

    drop(inflight);
    histogram!(REQUEST_DURATION, "status" => response.status().as_str().to_owned())
        .record(start.elapsed().as_secs_f64());

    // Dropping the context would abort whatever is still running
    if ctx.pending_tasks() > 0 {
        counter!(DEFERRED_DRAINS).increment(1);
        tokio::spawn(async move { ctx.drain().await });
    }

    response
}

/// Counts a request as inflight until dropped, including when the
/// connection goes away mid-dispatch.
struct InflightGuard(metrics::Gauge);

impl InflightGuard {
    fn new() -> Self {
        let gauge = gauge!(REQUESTS_INFLIGHT);
        gauge.increment(1.0);
        InflightGuard(gauge)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EntityEnv;
    use crate::greeter::{ENTITY_CALLS_HEADER, ENTITY_ID_HEADER, GreeterFactory};
    use async_trait::async_trait;
    use entity::{EntityError, EntityNamespace, EntityState};
    use hyper::header::HeaderValue;
    use monitoring::testutils::{RecordingBackend, test_request};
    use metrics::{
        Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use monitoring::{
        BAGGAGE_HEADER, ExecutionContext, Fetch, HandlerError, HandlerResult, InstrumentedFetch,
        MonitorConfig, SENTRY_TRACE_HEADER, SpanOutcome, create_fetch_with_monitor,
    };
    use parking_lot::Mutex;
    use std::time::Duration;

    const TRACE_ID: &str = "771a43a4192642f0b136d5159a501700";
    const INCOMING_TRACE: &str = "771a43a4192642f0b136d5159a501700-b2c9ea4c6a6b4b2b-1";
    const INCOMING_BAGGAGE: &str = "sentry-trace_id=771a43a4192642f0b136d5159a501700";

    fn test_env<F: EntityFactory>(factory: F) -> WorkerEnv<F> {
        WorkerEnv {
            entities: EntityNamespace::new("test", factory),
            monitoring: MonitorConfig::default(),
            upstream: None,
        }
    }

    fn greeter_env(backend: &RecordingBackend) -> WorkerEnv<GreeterFactory> {
        test_env(GreeterFactory::new(
            EntityEnv::default(),
            Arc::new(backend.clone()),
        ))
    }

    fn traced_request(path: &str) -> Request<Bytes> {
        let mut request = test_request(path);
        request
            .headers_mut()
            .insert(SENTRY_TRACE_HEADER, HeaderValue::from_static(INCOMING_TRACE));
        request
            .headers_mut()
            .insert(BAGGAGE_HEADER, HeaderValue::from_static(INCOMING_BAGGAGE));
        request
    }

    // Trace headers every routed request arrives with
    #[derive(Clone, Default)]
    struct HeaderLog {
        seen: Arc<Mutex<Vec<(Option<String>, Option<String>)>>>,
    }

    impl HeaderLog {
        fn record(&self, request: &Request<Bytes>) {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .map(|v| v.to_str().unwrap().to_string())
            };
            self.seen
                .lock()
                .push((header(BAGGAGE_HEADER), header(SENTRY_TRACE_HEADER)));
        }
    }

    struct RecordingEntity {
        log: HeaderLog,
        fail: bool,
    }

    #[async_trait]
    impl Fetch for RecordingEntity {
        async fn fetch(&self, request: Request<Bytes>) -> HandlerResult {
            self.log.record(&request);
            if self.fail {
                return Err(HandlerError::Internal("entity failed".into()));
            }
            Ok(Response::new(Bytes::from_static(b"recorded")))
        }
    }

    struct RecordingFactory {
        log: HeaderLog,
        fail: bool,
    }

    impl EntityFactory for RecordingFactory {
        type Entity = RecordingEntity;

        fn create(&self, _state: Arc<EntityState>) -> Result<RecordingEntity, EntityError> {
            Ok(RecordingEntity {
                log: self.log.clone(),
                fail: self.fail,
            })
        }
    }

    type EntityOptions = fn(&EntityEnv) -> MonitorConfig;

    fn entity_options(env: &EntityEnv) -> MonitorConfig {
        env.monitoring.clone()
    }

    // Builds each entity through the monitoring adapter, with a reduced
    // handler recording what reaches it
    struct MonitoredFactory {
        log: HeaderLog,
        backend: RecordingBackend,
    }

    impl EntityFactory for MonitoredFactory {
        type Entity = InstrumentedFetch<EntityEnv, RecordingEntity, EntityOptions>;

        fn create(&self, state: Arc<EntityState>) -> Result<Self::Entity, EntityError> {
            let entity = RecordingEntity {
                log: self.log.clone(),
                fail: false,
            };
            Ok(create_fetch_with_monitor(
                entity,
                entity_options as EntityOptions,
                Arc::new(self.backend.clone()),
                EntityEnv::default(),
                state,
            ))
        }
    }

    fn header<'a>(response: &'a Response<Bytes>, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_same_path_reaches_same_entity() {
        let backend = RecordingBackend::new();
        let env = greeter_env(&backend);
        let handler = instrumented_dispatcher(Arc::new(backend.clone()));
        assert!(env.entities.is_empty());

        let first = dispatch(&handler, &env, test_request("/a")).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.body().as_ref(), b"Hello world!");
        assert_eq!(header(&first, ENTITY_CALLS_HEADER), "1");

        // Repeated and trailing slashes name the same entity
        let second = dispatch(&handler, &env, test_request("//a/")).await;
        assert_eq!(header(&second, ENTITY_CALLS_HEADER), "2");
        assert_eq!(header(&first, ENTITY_ID_HEADER), header(&second, ENTITY_ID_HEADER));

        let other = dispatch(&handler, &env, test_request("/b")).await;
        assert_eq!(header(&other, ENTITY_CALLS_HEADER), "1");
        assert_ne!(header(&first, ENTITY_ID_HEADER), header(&other, ENTITY_ID_HEADER));

        assert_eq!(env.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_root_path_entity() {
        let backend = RecordingBackend::new();
        let env = greeter_env(&backend);
        let handler = instrumented_dispatcher(Arc::new(backend.clone()));

        let root = dispatch(&handler, &env, test_request("/")).await;
        let id = env.entities.id_from_name("/");
        assert_eq!(header(&root, ENTITY_ID_HEADER), id.as_str());
        assert!(env.entities.instance(&id).is_some());
    }

    #[tokio::test]
    async fn test_trace_reaches_entity_unmodified() {
        let backend = RecordingBackend::new();
        let log = HeaderLog::default();
        let env = test_env(RecordingFactory {
            log: log.clone(),
            fail: false,
        });
        let handler = instrumented_dispatcher(Arc::new(backend.clone()));

        let response = dispatch(&handler, &env, traced_request("/a")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let spans = backend.spans();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].continued);

        let seen = log.seen.lock().clone();
        assert_eq!(
            seen,
            vec![(
                spans[0].trace.baggage.clone(),
                spans[0].trace.sentry_trace.clone()
            )]
        );
        // The dispatcher's span joins the caller's trace
        assert_eq!(spans[0].trace.trace_id(), Some(TRACE_ID));
    }

    #[tokio::test]
    async fn test_trace_reaches_monitored_entity_unmodified() {
        let backend = RecordingBackend::new();
        let log = HeaderLog::default();
        let env = test_env(MonitoredFactory {
            log: log.clone(),
            backend: backend.clone(),
        });
        let handler = instrumented_dispatcher(Arc::new(backend.clone()));

        let response = dispatch(&handler, &env, traced_request("/a")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"recorded");

        // The entity span finishes inside the dispatcher span
        let spans = backend.spans();
        assert_eq!(spans.len(), 2);
        let (entity, dispatcher) = (&spans[0], &spans[1]);
        assert!(entity.continued);

        let seen = log.seen.lock().clone();
        assert_eq!(
            seen,
            vec![(
                dispatcher.trace.baggage.clone(),
                dispatcher.trace.sentry_trace.clone()
            )]
        );
        assert_eq!(entity.trace.trace_id(), Some(TRACE_ID));
        assert_ne!(entity.trace.sentry_trace, dispatcher.trace.sentry_trace);
    }

    #[tokio::test]
    async fn test_untraced_request_starts_trace() {
        let backend = RecordingBackend::new();
        let log = HeaderLog::default();
        let env = test_env(RecordingFactory {
            log: log.clone(),
            fail: false,
        });
        let handler = instrumented_dispatcher(Arc::new(backend.clone()));

        dispatch(&handler, &env, test_request("/a")).await;

        let spans = backend.spans();
        assert!(!spans[0].continued);
        let (baggage, sentry_trace) = log.seen.lock()[0].clone();
        assert!(baggage.is_some());
        assert_eq!(sentry_trace, spans[0].trace.sentry_trace);
    }

    #[tokio::test]
    async fn test_entity_failure_is_reported_with_trace() {
        let backend = RecordingBackend::new();
        let env = test_env(RecordingFactory {
            log: HeaderLog::default(),
            fail: true,
        });
        let handler = instrumented_dispatcher(Arc::new(backend.clone()));

        let result = handler
            .fetch(traced_request("/a"), &env, &RequestContext::new())
            .await;
        assert!(matches!(result, Err(HandlerError::Internal(_))));

        let errors = backend.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].trace_id.as_deref(), Some(TRACE_ID));
        assert_eq!(backend.spans()[0].outcome, SpanOutcome::Error);

        // Over HTTP the same failure becomes a 500
        let response = dispatch(&handler, &env, traced_request("/a")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_instrumented_entities_share_trace() {
        let backend = RecordingBackend::new();
        let env = greeter_env(&backend);
        let handler = instrumented_dispatcher(Arc::new(backend.clone()));

        dispatch(&handler, &env, traced_request("/a")).await;

        // The entity span finishes first, inside the dispatcher span
        let spans = backend.spans();
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|span| span.continued));
        assert!(spans.iter().all(|span| span.trace.trace_id() == Some(TRACE_ID)));
        assert!(spans.iter().all(|span| span.trace.baggage.as_deref() == Some(INCOMING_BAGGAGE)));
    }

    #[tokio::test]
    async fn test_deferred_flushes_complete() {
        let backend = RecordingBackend::new();
        let env = greeter_env(&backend);
        let handler = instrumented_dispatcher(Arc::new(backend.clone()));

        dispatch(&handler, &env, test_request("/a")).await;
        env.entities.drain().await;

        // The dispatcher's flush is drained by a background task
        for _ in 0..100 {
            if backend.flush_count() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.flush_count(), 2);
    }

    struct PassThrough;

    #[async_trait]
    impl ExportedFetch<()> for PassThrough {
        async fn fetch(
            &self,
            _request: Request<Bytes>,
            _env: &(),
            ctx: &dyn ExecutionContext,
        ) -> HandlerResult {
            ctx.pass_through_on_exception();
            Err(HandlerError::Upstream("origin".into(), "refused".into()))
        }
    }

    #[tokio::test]
    async fn test_pass_through_failure() {
        let response = dispatch(&PassThrough, &(), test_request("/a")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    // Tracks the inflight gauge, ignoring every other metric
    #[derive(Default)]
    struct InflightLevel {
        // (current, highest)
        level: Mutex<(f64, f64)>,
    }

    impl GaugeFn for InflightLevel {
        fn increment(&self, value: f64) {
            let mut level = self.level.lock();
            level.0 += value;
            level.1 = level.1.max(level.0);
        }

        fn decrement(&self, value: f64) {
            self.level.lock().0 -= value;
        }

        fn set(&self, value: f64) {
            let mut level = self.level.lock();
            level.0 = value;
            level.1 = level.1.max(value);
        }
    }

    #[derive(Default)]
    struct InflightRecorder {
        inflight: Arc<InflightLevel>,
    }

    impl Recorder for InflightRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _key: &Key, _metadata: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
            match key.name() == REQUESTS_INFLIGHT.name {
                true => Gauge::from_arc(self.inflight.clone()),
                false => Gauge::noop(),
            }
        }

        fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    struct Stalled;

    #[async_trait]
    impl ExportedFetch<()> for Stalled {
        async fn fetch(
            &self,
            _request: Request<Bytes>,
            _env: &(),
            _ctx: &dyn ExecutionContext,
        ) -> HandlerResult {
            std::future::pending().await
        }
    }

    #[test]
    fn test_abandoned_request_leaves_inflight() {
        let recorder = InflightRecorder::default();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let dispatched = dispatch(&Stalled, &(), test_request("/a"));
                let result = tokio::time::timeout(Duration::from_millis(5), dispatched).await;
                assert!(result.is_err());

                dispatch(&PassThrough, &(), test_request("/a")).await;
            })
        });

        let (current, highest) = *recorder.inflight.level.lock();
        assert_eq!(current, 0.0);
        assert_eq!(highest, 1.0);
    }
}
