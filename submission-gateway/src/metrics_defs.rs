use shared::metrics_defs::{MetricDef, MetricType};

pub const SUBMISSION_REQUESTS: MetricDef = MetricDef {
    name: "submission_gateway.requests",
    metric_type: MetricType::Counter,
    description: "Requests handled by the submission gateway. Tagged with outcome.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "submission_gateway.request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with outcome.",
};

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "submission_gateway.upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of record store calls in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SUBMISSION_REQUESTS,
    REQUEST_DURATION,
    UPSTREAM_REQUEST_DURATION,
];
