use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Dispatch duration in seconds, from request body to response. Tagged with status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being dispatched",
};

pub const DEFERRED_DRAINS: MetricDef = MetricDef {
    name: "request.deferred_drains",
    metric_type: MetricType::Counter,
    description: "Requests whose deferred tasks outlived the response and were drained in the background",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUEST_DURATION, REQUESTS_INFLIGHT, DEFERRED_DRAINS];
