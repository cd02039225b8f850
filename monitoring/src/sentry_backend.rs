use crate::context::DeferredTask;
use crate::errors::{HandlerError, MonitorError};
use crate::handler::{BoxFuture, HandlerResult};
use crate::monitor::{Monitor, MonitorBackend, MonitorConfig, MonitorSpan, SpanOutcome};
use crate::trace::{BAGGAGE_HEADER, SENTRY_TRACE_HEADER, TraceData, header_str, trace_id_of};
use http::HeaderMap;
use parking_lot::Mutex;
use sentry::protocol::SpanStatus;
use sentry::types::Dsn;
use sentry::{ClientOptions, Hub, Scope, SentryFutureExt, Transaction, TransactionContext};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const SPAN_OP: &str = "http.server";

/// Reports spans and errors to Sentry.
///
/// One client (and transport) is created per distinct configuration and
/// shared by every monitor initialized with it; each monitor gets its own hub.
#[derive(Default)]
pub struct SentryBackend {
    transport: Option<Arc<dyn sentry::TransportFactory>>,
    clients: Mutex<Vec<(MonitorConfig, Arc<sentry::Client>)>>,
}

impl SentryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends envelopes through `transport` instead of the default HTTP transport.
    pub fn with_transport(transport: Arc<dyn sentry::TransportFactory>) -> Self {
        Self {
            transport: Some(transport),
            clients: Mutex::default(),
        }
    }

    fn client(&self, config: &MonitorConfig, dsn: Dsn) -> Arc<sentry::Client> {
        let mut clients = self.clients.lock();
        if let Some((_, client)) = clients.iter().find(|(known, _)| known == config) {
            return client.clone();
        }

        let mut options = ClientOptions {
            dsn: Some(dsn),
            traces_sample_rate: config.traces_sample_rate,
            debug: config.debug,
            environment: config.environment.clone().map(Cow::Owned),
            ..Default::default()
        };
        if let Some(transport) = &self.transport {
            options.transport = Some(transport.clone());
        }
        let client = Arc::new(sentry::Client::from_config(sentry::apply_defaults(options)));
        clients.push((config.clone(), client.clone()));
        tracing::debug!(clients = clients.len(), "Created Sentry client");
        client
    }
}

impl MonitorBackend for SentryBackend {
    fn init(&self, config: &MonitorConfig) -> Result<Arc<dyn Monitor>, MonitorError> {
        let dsn = config.dsn.as_deref().map(str::parse::<Dsn>).transpose()?;
        let public_key = dsn.as_ref().map(|dsn| dsn.public_key().to_owned());

        let client = dsn.map(|dsn| self.client(config, dsn));

        tracing::debug!(
            reporting = client.is_some(),
            traces_sample_rate = config.traces_sample_rate,
            "Initialized Sentry monitor"
        );

        Ok(Arc::new(SentryMonitor {
            hub: Arc::new(Hub::new(client, Arc::new(Scope::default()))),
            public_key,
            traces_sample_rate: config.traces_sample_rate,
            environment: config.environment.clone(),
        }))
    }
}

struct SentryMonitor {
    hub: Arc<Hub>,
    public_key: Option<String>,
    traces_sample_rate: f32,
    environment: Option<String>,
}

impl SentryMonitor {
    // Dynamic sampling context for traces that start at this monitor.
    fn baggage(&self, trace_id: &str) -> String {
        let mut entries = vec![
            format!("sentry-trace_id={trace_id}"),
            format!("sentry-sample_rate={}", self.traces_sample_rate),
        ];
        if let Some(public_key) = &self.public_key {
            entries.push(format!("sentry-public_key={public_key}"));
        }
        if let Some(environment) = &self.environment {
            entries.push(format!("sentry-environment={environment}"));
        }
        entries.join(",")
    }
}

impl Monitor for SentryMonitor {
    fn start_span(&self, name: &str, headers: &HeaderMap) -> Box<dyn MonitorSpan> {
        // Scope changes made for this span must not leak into other calls
        let hub = Arc::new(Hub::new_from_top(&self.hub));

        let incoming = headers
            .iter()
            .filter_map(|(key, value)| value.to_str().ok().map(|value| (key.as_str(), value)));
        let ctx = TransactionContext::continue_from_headers(name, SPAN_OP, incoming);
        let transaction = hub.start_transaction(ctx);
        hub.configure_scope(|scope| scope.set_span(Some(transaction.clone().into())));

        let sentry_trace = transaction
            .iter_headers()
            .find(|(header, _)| *header == SENTRY_TRACE_HEADER)
            .map(|(_, value)| value);

        // Baggage is frozen by the head of the trace, so an incoming value wins
        // when its trace was continued
        let continued = header_str(headers, SENTRY_TRACE_HEADER)
            .as_deref()
            .and_then(trace_id_of)
            .is_some();
        let baggage = header_str(headers, BAGGAGE_HEADER)
            .filter(|_| continued)
            .or_else(|| {
                sentry_trace
                    .as_deref()
                    .and_then(trace_id_of)
                    .map(|trace_id| self.baggage(trace_id))
            });

        Box::new(SentrySpan {
            hub,
            transaction,
            trace: TraceData {
                baggage,
                sentry_trace,
            },
        })
    }

    fn flush(&self) -> DeferredTask {
        let client = self.hub.client();
        Box::pin(async move {
            let Some(client) = client else {
                return;
            };
            // Client::flush blocks until the transport drains or the timeout hits
            match tokio::task::spawn_blocking(move || client.flush(Some(FLUSH_TIMEOUT))).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!("Timed out flushing Sentry events"),
                Err(e) => tracing::error!(error = %e, "Sentry flush task failed"),
            }
        })
    }
}

struct SentrySpan {
    hub: Arc<Hub>,
    transaction: Transaction,
    trace: TraceData,
}

impl MonitorSpan for SentrySpan {
    fn trace_data(&self) -> TraceData {
        self.trace.clone()
    }

    fn instrument<'a>(&self, fut: BoxFuture<'a, HandlerResult>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(fut.bind_hub(self.hub.clone()))
    }

    fn capture_error(&self, error: &HandlerError) {
        let event_id = self.hub.capture_error(error);
        tracing::debug!(%event_id, "Captured handler error");
    }

    fn finish(self: Box<Self>, outcome: SpanOutcome) {
        self.transaction.set_status(span_status(outcome));
        self.transaction.finish();
    }
}

fn span_status(outcome: SpanOutcome) -> SpanStatus {
    let status = match outcome {
        SpanOutcome::Status(status) => status,
        SpanOutcome::Error => return SpanStatus::InternalError,
    };

    match status.as_u16() {
        100..=399 => SpanStatus::Ok,
        400 => SpanStatus::InvalidArgument,
        401 => SpanStatus::Unauthenticated,
        403 => SpanStatus::PermissionDenied,
        404 => SpanStatus::NotFound,
        429 => SpanStatus::ResourceExhausted,
        501 => SpanStatus::Unimplemented,
        503 => SpanStatus::Unavailable,
        504 => SpanStatus::DeadlineExceeded,
        500..=599 => SpanStatus::InternalError,
        _ => SpanStatus::UnknownError,
    }
}
