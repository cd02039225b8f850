use crate::context::{StandInContext, WaitUntil};
use crate::handler::{ExportedFetch, Fetch, HandlerResult, IgnoreContext};
use crate::monitor::{MonitorBackend, MonitorConfig};
use crate::wrap::{Instrumented, with_monitor};
use async_trait::async_trait;
use hyper::Request;
use hyper::body::Bytes;
use std::sync::Arc;

/// A reduced-signature handler running under the monitoring wrapper.
/// See [`create_fetch_with_monitor`].
pub struct InstrumentedFetch<Env, H, C> {
    handler: Instrumented<Env, IgnoreContext<H>, C>,
    env: Env,
    ctx: StandInContext,
}

/// Creates an instrumented fetch handler for entities.
///
/// The monitoring wrapper only supports the full `(request, env, ctx)`
/// signature, while entities are called with the request alone and own a
/// context that is not an [`ExecutionContext`](crate::ExecutionContext). The
/// returned handler supplies `env` and a [`StandInContext`] on every call. Deferred
/// tasks the wrapper submits, such as flushing reports, are forwarded to
/// `ctx` so they are awaited with the rest of the entity's background work.
///
/// Build it once per entity and keep it: the wrapper resolves its monitor on
/// the first call and reuses it afterwards.
///
/// ```ignore
/// let fetch = create_fetch_with_monitor(
///     fetch_fn(|_request| async { Ok(Response::new(Bytes::from("Hello world!"))) }),
///     |env: &EntityEnv| env.monitoring.clone(),
///     backend,
///     env,
///     state,
/// );
/// ```
pub fn create_fetch_with_monitor<Env, H, C>(
    fetch: H,
    options: C,
    backend: Arc<dyn MonitorBackend>,
    env: Env,
    ctx: Arc<dyn WaitUntil>,
) -> InstrumentedFetch<Env, H, C>
where
    Env: Send + Sync,
    H: Fetch,
    C: Fn(&Env) -> MonitorConfig + Send + Sync,
{
    InstrumentedFetch {
        handler: with_monitor(options, backend, IgnoreContext(fetch)),
        env,
        ctx: StandInContext::new(ctx),
    }
}

#[async_trait]
impl<Env, H, C> Fetch for InstrumentedFetch<Env, H, C>
where
    Env: Send + Sync,
    H: Fetch,
    C: Fn(&Env) -> MonitorConfig + Send + Sync,
{
    async fn fetch(&self, request: Request<Bytes>) -> HandlerResult {
        self.handler.fetch(request, &self.env, &self.ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskRegistry;
    use crate::errors::HandlerError;
    use crate::handler::fetch_fn;
    use crate::testutils::{RecordingBackend, test_request};
    use crate::trace::SENTRY_TRACE_HEADER;
    use hyper::Response;
    use hyper::header::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Env {
        resolved: Arc<AtomicUsize>,
    }

    fn counting_options(env: &Env) -> MonitorConfig {
        env.resolved.fetch_add(1, Ordering::SeqCst);
        MonitorConfig::default()
    }

    #[tokio::test]
    async fn test_options_resolved_once() {
        let backend = RecordingBackend::new();
        let env = Env {
            resolved: Arc::new(AtomicUsize::new(0)),
        };
        let real_ctx = Arc::new(TaskRegistry::new());

        let fetch = create_fetch_with_monitor(
            fetch_fn(|_request| async {
                Ok::<_, HandlerError>(Response::new(Bytes::from("Hello world!")))
            }),
            counting_options,
            Arc::new(backend.clone()),
            env.clone(),
            real_ctx.clone(),
        );

        for _ in 0..2 {
            let response = fetch.fetch(test_request("/a")).await.unwrap();
            assert_eq!(response.body().as_ref(), b"Hello world!");
        }

        assert_eq!(env.resolved.load(Ordering::SeqCst), 1);
        assert_eq!(backend.init_count(), 1);
        assert_eq!(backend.spans().len(), 2);
    }

    #[tokio::test]
    async fn test_deferred_flush_reaches_real_context() {
        let backend = RecordingBackend::new();
        let real_ctx = Arc::new(TaskRegistry::new());

        let fetch = create_fetch_with_monitor(
            fetch_fn(|_request| async { Ok::<_, HandlerError>(Response::new(Bytes::new())) }),
            counting_options,
            Arc::new(backend.clone()),
            Env {
                resolved: Arc::new(AtomicUsize::new(0)),
            },
            real_ctx.clone(),
        );

        fetch.fetch(test_request("/a")).await.unwrap();

        // The flush is still outstanding on the real context until drained
        assert_eq!(real_ctx.pending(), 1);
        real_ctx.drain().await;
        assert_eq!(backend.flush_count(), 1);
        assert!(real_ctx.is_idle());
    }

    #[tokio::test]
    async fn test_error_reported_with_incoming_trace() {
        let backend = RecordingBackend::new();
        let fetch = create_fetch_with_monitor(
            fetch_fn(|_request| async {
                Err::<Response<Bytes>, _>(HandlerError::Upstream(
                    "httpbin".into(),
                    "refused".into(),
                ))
            }),
            counting_options,
            Arc::new(backend.clone()),
            Env {
                resolved: Arc::new(AtomicUsize::new(0)),
            },
            Arc::new(TaskRegistry::new()),
        );

        let mut request = test_request("/a");
        request.headers_mut().insert(
            SENTRY_TRACE_HEADER,
            HeaderValue::from_static("771a43a4192642f0b136d5159a501700-b2c9ea4c6a6b4b2b-1"),
        );

        let result = fetch.fetch(request).await;
        assert!(matches!(result, Err(HandlerError::Upstream(..))));

        let errors = backend.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].trace_id.as_deref(),
            Some("771a43a4192642f0b136d5159a501700")
        );
    }
}
