//! Metrics definitions for the dedup cache.

use shared::metrics_defs::{MetricDef, MetricType};

pub const DEDUP_CACHE_HIT: MetricDef = MetricDef {
    name: "dedup_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of lookups that found a live entry. Tagged with tier.",
};

pub const DEDUP_CACHE_MISS: MetricDef = MetricDef {
    name: "dedup_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of lookups that found no live entry in any tier",
};

pub const DURABLE_TIER_ERRORS: MetricDef = MetricDef {
    name: "dedup_cache.durable.errors",
    metric_type: MetricType::Counter,
    description: "Durable tier calls that failed or timed out. Tagged with op.",
};

pub const MEMORY_TIER_EVICTIONS: MetricDef = MetricDef {
    name: "dedup_cache.memory.evictions",
    metric_type: MetricType::Counter,
    description: "Entries removed from the in-process tier by capacity pruning",
};

pub const MEMORY_TIER_ENTRIES: MetricDef = MetricDef {
    name: "dedup_cache.memory.entries",
    metric_type: MetricType::Gauge,
    description: "Number of entries held by the in-process tier",
};

pub const ALL_METRICS: &[MetricDef] = &[
    DEDUP_CACHE_HIT,
    DEDUP_CACHE_MISS,
    DURABLE_TIER_ERRORS,
    MEMORY_TIER_EVICTIONS,
    MEMORY_TIER_ENTRIES,
];
