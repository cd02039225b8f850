use crate::context::DeferredTask;
use crate::errors::{HandlerError, MonitorError};
use crate::handler::{BoxFuture, HandlerResult};
use crate::trace::TraceData;
use http::{HeaderMap, StatusCode};
use sentry::types::Dsn;
use serde::Deserialize;
use std::sync::Arc;

/// Monitoring options resolved from the environment of a handler.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Where reports are sent. Without a DSN spans are still created locally,
    /// but nothing is reported.
    #[serde(default)]
    pub dsn: Option<String>,
    /// Fraction of transactions that are sampled, from 0.0 to 1.0
    #[serde(default = "default_traces_sample_rate")]
    pub traces_sample_rate: f32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub environment: Option<String>,
}

fn default_traces_sample_rate() -> f32 {
    1.0
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            dsn: None,
            traces_sample_rate: default_traces_sample_rate(),
            debug: false,
            environment: None,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if let Some(dsn) = &self.dsn {
            dsn.parse::<Dsn>()?;
        }
        if !(0.0..=1.0).contains(&self.traces_sample_rate) {
            return Err(MonitorError::InvalidSampleRate(self.traces_sample_rate));
        }
        Ok(())
    }
}

/// How an instrumented handler call ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanOutcome {
    Status(StatusCode),
    Error,
}

/// Creates monitors from resolved configuration.
pub trait MonitorBackend: Send + Sync {
    fn init(&self, config: &MonitorConfig) -> Result<Arc<dyn Monitor>, MonitorError>;
}

/// A configured monitoring session, shared by every call of one wrapper.
pub trait Monitor: Send + Sync {
    /// Begins a span, continuing the trace carried by `headers` if any.
    fn start_span(&self, name: &str, headers: &HeaderMap) -> Box<dyn MonitorSpan>;

    /// Returns a task that delivers buffered reports.
    fn flush(&self) -> DeferredTask;
}

pub trait MonitorSpan: Send + Sync {
    fn trace_data(&self) -> TraceData;

    /// Runs `fut` with this span's reporting scope bound.
    fn instrument<'a>(&self, fut: BoxFuture<'a, HandlerResult>) -> BoxFuture<'a, HandlerResult>;

    fn capture_error(&self, error: &HandlerError);

    fn finish(self: Box<Self>, outcome: SpanOutcome);
}
