use http::HeaderMap;
use http::header::HeaderValue;
use std::future::Future;

pub const SENTRY_TRACE_HEADER: &str = "sentry-trace";
pub const BAGGAGE_HEADER: &str = "baggage";

tokio::task_local! {
    static ACTIVE_TRACE: TraceData;
}

/// Propagation tokens linking a downstream call to the active trace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceData {
    pub baggage: Option<String>,
    pub sentry_trace: Option<String>,
}

impl TraceData {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            baggage: header_str(headers, BAGGAGE_HEADER),
            sentry_trace: header_str(headers, SENTRY_TRACE_HEADER),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.baggage.is_none() && self.sentry_trace.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.baggage.is_some() && self.sentry_trace.is_some()
    }

    /// The trace id carried by the `sentry-trace` token.
    pub fn trace_id(&self) -> Option<&str> {
        self.sentry_trace.as_deref().and_then(trace_id_of)
    }

    /// Writes the tokens into `headers`, replacing existing values.
    ///
    /// A missing token breaks trace correlation but never fails the request:
    /// whatever is present is still forwarded. A header without a matching
    /// token is removed, so tokens from different traces are never mixed.
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        if !self.is_complete() && !self.is_empty() {
            tracing::warn!(
                baggage = self.baggage.is_some(),
                sentry_trace = self.sentry_trace.is_some(),
                "Forwarding incomplete trace context"
            );
        }

        let tokens = [
            (BAGGAGE_HEADER, &self.baggage),
            (SENTRY_TRACE_HEADER, &self.sentry_trace),
        ];
        for (name, token) in tokens {
            let value = token.as_deref().map(HeaderValue::from_str).transpose();
            match value {
                Ok(Some(value)) => {
                    headers.insert(name, value);
                }
                Ok(None) => {
                    headers.remove(name);
                }
                Err(e) => {
                    tracing::warn!(header = name, error = %e, "Dropping invalid trace header");
                    headers.remove(name);
                }
            }
        }
    }
}

/// Returns the trace tokens of the span currently running this task.
///
/// Outside of an instrumented handler the result is empty.
pub fn trace_data() -> TraceData {
    ACTIVE_TRACE
        .try_with(|trace| trace.clone())
        .unwrap_or_default()
}

pub(crate) async fn with_trace<F: Future>(trace: TraceData, fut: F) -> F::Output {
    ACTIVE_TRACE.scope(trace, fut).await
}

pub(crate) fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

// sentry-trace is `{trace_id}-{span_id}[-{sampled}]`
pub(crate) fn trace_id_of(sentry_trace: &str) -> Option<&str> {
    sentry_trace
        .split('-')
        .next()
        .filter(|id| id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "771a43a4192642f0b136d5159a501700-b2c9ea4c6a6b4b2b-1";

    #[test]
    fn test_trace_id() {
        let trace = TraceData {
            baggage: None,
            sentry_trace: Some(TRACE.into()),
        };
        assert_eq!(trace.trace_id(), Some("771a43a4192642f0b136d5159a501700"));

        let malformed = TraceData {
            baggage: None,
            sentry_trace: Some("not-a-trace".into()),
        };
        assert_eq!(malformed.trace_id(), None);
    }

    #[test]
    fn test_apply_forwards_available_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(SENTRY_TRACE_HEADER, HeaderValue::from_static("stale"));

        let partial = TraceData {
            baggage: Some("sentry-trace_id=771a43a4192642f0b136d5159a501700".into()),
            sentry_trace: None,
        };
        partial.apply_to(&mut headers);
        assert_eq!(
            headers[BAGGAGE_HEADER],
            "sentry-trace_id=771a43a4192642f0b136d5159a501700"
        );
        // A stale value from another trace is not forwarded
        assert!(!headers.contains_key(SENTRY_TRACE_HEADER));

        let complete = TraceData {
            baggage: Some("sentry-environment=prod".into()),
            sentry_trace: Some(TRACE.into()),
        };
        complete.apply_to(&mut headers);
        assert_eq!(TraceData::from_headers(&headers), complete);
    }

    #[test]
    fn test_apply_removes_invalid_token() {
        let mut headers = HeaderMap::new();
        headers.insert(BAGGAGE_HEADER, HeaderValue::from_static("sentry-trace_id=stale"));

        let invalid = TraceData {
            baggage: Some("bad\nvalue".into()),
            sentry_trace: Some(TRACE.into()),
        };
        invalid.apply_to(&mut headers);
        assert!(!headers.contains_key(BAGGAGE_HEADER));
        assert_eq!(headers[SENTRY_TRACE_HEADER], TRACE);
    }

    #[tokio::test]
    async fn test_trace_data_scope() {
        assert!(trace_data().is_empty());

        let trace = TraceData {
            baggage: Some("b".into()),
            sentry_trace: Some(TRACE.into()),
        };
        let seen = with_trace(trace.clone(), async { trace_data() }).await;
        assert_eq!(seen, trace);
    }
}
