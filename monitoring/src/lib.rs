//! Error and trace monitoring for fetch handlers.
//!
//! The monitoring wrapper ([`with_monitor`]) expects the full handler signature
//! `(request, env, ctx)`. Entity handlers only receive `(request)`; the
//! [`create_fetch_with_monitor`] adapter bridges the two by building a
//! [`StandInContext`] that forwards deferred work to the entity's real context.

mod adapter;
mod context;
mod errors;
mod handler;
mod monitor;
mod sentry_backend;
mod trace;
mod wrap;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use adapter::{InstrumentedFetch, create_fetch_with_monitor};
pub use context::{DeferredTask, ExecutionContext, Props, StandInContext, TaskRegistry, WaitUntil};
pub use errors::{HandlerError, MonitorError};
pub use handler::{BoxFuture, ExportedFetch, Fetch, FetchFn, HandlerResult, fetch_fn};
pub use monitor::{Monitor, MonitorBackend, MonitorConfig, MonitorSpan, SpanOutcome};
pub use sentry_backend::SentryBackend;
pub use trace::{BAGGAGE_HEADER, SENTRY_TRACE_HEADER, TraceData, trace_data};
pub use wrap::{Instrumented, with_monitor};
