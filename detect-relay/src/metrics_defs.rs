//! Metrics definitions for the detect relay.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS: MetricDef = MetricDef {
    name: "relay.requests",
    metric_type: MetricType::Counter,
    description: "Number of relay requests handled. Tagged with outcome.",
};

pub const UPSTREAM_DURATION: MetricDef = MetricDef {
    name: "relay.upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Time for a completed exchange with the inference service in seconds",
};

pub const READINESS_PROBES: MetricDef = MetricDef {
    name: "relay.readiness.probes",
    metric_type: MetricType::Counter,
    description: "Number of readiness probes sent. Tagged with result.",
};

pub const TEMP_FILE_CLEANUP_FAILED: MetricDef = MetricDef {
    name: "relay.temp_files.cleanup_failed",
    metric_type: MetricType::Counter,
    description: "Number of temporary upload files that could not be removed",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUESTS,
    UPSTREAM_DURATION,
    READINESS_PROBES,
    TEMP_FILE_CLEANUP_FAILED,
];
