use crate::context::ExecutionContext;
use crate::errors::MonitorError;
use crate::handler::{ExportedFetch, HandlerResult};
use crate::monitor::{Monitor, MonitorBackend, MonitorConfig, SpanOutcome};
use crate::trace::with_trace;
use async_trait::async_trait;
use hyper::Request;
use hyper::body::Bytes;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// A handler wrapped with monitoring. See [`with_monitor`].
pub struct Instrumented<Env, H, C> {
    handler: H,
    options: C,
    backend: Arc<dyn MonitorBackend>,
    monitor: OnceCell<Arc<dyn Monitor>>,
    _env: PhantomData<fn(&Env)>,
}

/// Wraps a full-signature handler so that every call runs inside a monitoring span.
///
/// `options` is called with the environment of the first call and the
/// resulting monitor is reused by every later call. If resolving the monitor
/// fails, the error is returned to the caller and the next call resolves again.
pub fn with_monitor<Env, H, C>(
    options: C,
    backend: Arc<dyn MonitorBackend>,
    handler: H,
) -> Instrumented<Env, H, C>
where
    Env: Send + Sync,
    H: ExportedFetch<Env>,
    C: Fn(&Env) -> MonitorConfig + Send + Sync,
{
    Instrumented {
        handler,
        options,
        backend,
        monitor: OnceCell::new(),
        _env: PhantomData,
    }
}

impl<Env, H, C> Instrumented<Env, H, C>
where
    Env: Send + Sync,
    C: Fn(&Env) -> MonitorConfig + Send + Sync,
{
    async fn monitor(&self, env: &Env) -> Result<&Arc<dyn Monitor>, MonitorError> {
        self.monitor
            .get_or_try_init(|| async {
                let config = (self.options)(env);
                config.validate()?;
                self.backend.init(&config)
            })
            .await
    }
}

#[async_trait]
impl<Env, H, C> ExportedFetch<Env> for Instrumented<Env, H, C>
where
    Env: Send + Sync,
    H: ExportedFetch<Env>,
    C: Fn(&Env) -> MonitorConfig + Send + Sync,
{
    async fn fetch(
        &self,
        request: Request<Bytes>,
        env: &Env,
        ctx: &dyn ExecutionContext,
    ) -> HandlerResult {
        let monitor = self.monitor(env).await?.clone();

        let name = format!("{} {}", request.method(), request.uri().path());
        let span = monitor.start_span(&name, request.headers());
        let trace = span.trace_data();

        let result = span
            .instrument(Box::pin(with_trace(
                trace,
                self.handler.fetch(request, env, ctx),
            )))
            .await;

        match &result {
            Ok(response) => span.finish(SpanOutcome::Status(response.status())),
            Err(e) => {
                tracing::error!(span = %name, error = %e, "Handler failed");
                span.capture_error(e);
                span.finish(SpanOutcome::Error);
            }
        }

        // Reports are delivered in the background by the caller's context
        ctx.wait_until(monitor.flush());

        result
    }
}
