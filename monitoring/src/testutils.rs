//! In-memory monitoring backend that records what the wrapper reports.

use crate::context::DeferredTask;
use crate::errors::{HandlerError, MonitorError};
use crate::handler::{BoxFuture, HandlerResult};
use crate::monitor::{Monitor, MonitorBackend, MonitorConfig, MonitorSpan, SpanOutcome};
use crate::trace::TraceData;
use http::HeaderMap;
use hyper::Request;
use hyper::body::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Clone, Debug)]
pub struct RecordedSpan {
    pub name: String,
    pub trace: TraceData,
    /// Whether the span continued a trace from the incoming headers
    pub continued: bool,
    pub outcome: SpanOutcome,
}

#[derive(Clone, Debug)]
pub struct RecordedError {
    pub message: String,
    pub trace_id: Option<String>,
}

#[derive(Default)]
struct Recorder {
    configs: Mutex<Vec<MonitorConfig>>,
    spans: Mutex<Vec<RecordedSpan>>,
    errors: Mutex<Vec<RecordedError>>,
    flushes: AtomicUsize,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct RecordingBackend {
    recorder: Arc<Recorder>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_count(&self) -> usize {
        self.recorder.configs.lock().len()
    }

    pub fn configs(&self) -> Vec<MonitorConfig> {
        self.recorder.configs.lock().clone()
    }

    /// Finished spans, in completion order
    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.recorder.spans.lock().clone()
    }

    pub fn errors(&self) -> Vec<RecordedError> {
        self.recorder.errors.lock().clone()
    }

    /// Number of flush tasks that ran to completion
    pub fn flush_count(&self) -> usize {
        self.recorder.flushes.load(Ordering::SeqCst)
    }
}

impl MonitorBackend for RecordingBackend {
    fn init(&self, config: &MonitorConfig) -> Result<Arc<dyn Monitor>, MonitorError> {
        self.recorder.configs.lock().push(config.clone());
        Ok(Arc::new(RecordingMonitor {
            recorder: self.recorder.clone(),
        }))
    }
}

struct RecordingMonitor {
    recorder: Arc<Recorder>,
}

impl Monitor for RecordingMonitor {
    fn start_span(&self, name: &str, headers: &HeaderMap) -> Box<dyn MonitorSpan> {
        let incoming = TraceData::from_headers(headers);
        let id = self.recorder.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let trace_id = incoming
            .trace_id()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{id:032x}"));
        // Incoming baggage only belongs to this span when its trace is continued
        let trace = TraceData {
            baggage: incoming
                .baggage
                .clone()
                .filter(|_| incoming.trace_id().is_some())
                .or_else(|| Some(format!("sentry-trace_id={trace_id}"))),
            sentry_trace: Some(format!("{trace_id}-{id:016x}-1")),
        };

        Box::new(RecordingSpan {
            recorder: self.recorder.clone(),
            name: name.to_owned(),
            trace,
            continued: incoming.trace_id().is_some(),
        })
    }

    fn flush(&self) -> DeferredTask {
        let recorder = self.recorder.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            recorder.flushes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

struct RecordingSpan {
    recorder: Arc<Recorder>,
    name: String,
    trace: TraceData,
    continued: bool,
}

impl MonitorSpan for RecordingSpan {
    fn trace_data(&self) -> TraceData {
        self.trace.clone()
    }

    fn instrument<'a>(&self, fut: BoxFuture<'a, HandlerResult>) -> BoxFuture<'a, HandlerResult> {
        fut
    }

    fn capture_error(&self, error: &HandlerError) {
        self.recorder.errors.lock().push(RecordedError {
            message: error.to_string(),
            trace_id: self.trace.trace_id().map(str::to_owned),
        });
    }

    fn finish(self: Box<Self>, outcome: SpanOutcome) {
        let span = *self;
        span.recorder.spans.lock().push(RecordedSpan {
            name: span.name,
            trace: span.trace,
            continued: span.continued,
            outcome,
        });
    }
}

pub fn test_request(path: &str) -> Request<Bytes> {
    Request::builder()
        .uri(format!("http://example.com{path}"))
        .body(Bytes::new())
        .unwrap()
}
