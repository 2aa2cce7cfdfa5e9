use shared::metrics_defs::{MetricDef, MetricType};

pub const VARIANT_ASSIGNMENTS: MetricDef = MetricDef {
    name: "ab_splitter.assignments",
    metric_type: MetricType::Counter,
    description: "Landing page requests served a variant. Tagged with variant, source.",
};

pub const ORIGIN_REQUEST_DURATION: MetricDef = MetricDef {
    name: "ab_splitter.origin.duration",
    metric_type: MetricType::Histogram,
    description: "Asset origin request duration in seconds. Tagged with status.",
};

pub const ORIGIN_ERRORS: MetricDef = MetricDef {
    name: "ab_splitter.origin.errors",
    metric_type: MetricType::Counter,
    description: "Requests that could not be served by the asset origin",
};

pub const ALL_METRICS: &[MetricDef] = &[VARIANT_ASSIGNMENTS, ORIGIN_REQUEST_DURATION, ORIGIN_ERRORS];
