//! Metrics and observability utilities
//!
//! Metric descriptions and recording helpers over the `metrics` facade.
//! The gateway installs the Prometheus exporter; library crates only record.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DocResearch metrics
pub const METRICS_PREFIX: &str = "docresearch";

/// Histogram buckets for HTTP request latency (in seconds).
/// A full pipeline run makes several LLM calls, so the tail is long.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010,
    0.050,
    0.100,
    0.250,
    0.500,
    1.000,
    2.500,
    5.000,
    10.00,
    30.00,
    60.00,
    120.0,
];

/// Buckets for single upstream calls (embedding, LLM, web search)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050,
    0.100,
    0.250,
    0.500,
    1.000,
    2.000,
    5.000,
    10.00,
    30.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Total pipeline runs by outcome"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end pipeline latency in seconds"
    );

    describe_histogram!(
        format!("{}_retrieval_attempts", METRICS_PREFIX),
        Unit::Count,
        "Grading passes per pipeline run"
    );

    describe_histogram!(
        format!("{}_generation_attempts", METRICS_PREFIX),
        Unit::Count,
        "Generations per pipeline run"
    );

    describe_counter!(
        format!("{}_pipeline_stages_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline stages executed"
    );

    describe_counter!(
        format!("{}_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "External call failures replaced by a fail-closed default"
    );

    describe_counter!(
        format!("{}_documents_graded_total", METRICS_PREFIX),
        Unit::Count,
        "Documents graded for relevance by verdict"
    );

    // Retrieval metrics
    describe_counter!(
        format!("{}_blank_documents_dropped_total", METRICS_PREFIX),
        Unit::Count,
        "Blank candidates removed before fusion"
    );

    describe_counter!(
        format!("{}_web_searches_total", METRICS_PREFIX),
        Unit::Count,
        "Web search calls"
    );

    // Upstream metrics
    describe_counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total LLM API requests"
    );

    describe_histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "LLM call latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a finished pipeline run
pub fn record_pipeline(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_pipeline_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record the attempt counters a run finished with
pub fn record_attempts(retrieval: u32, generation: u32) {
    histogram!(format!("{}_retrieval_attempts", METRICS_PREFIX)).record(f64::from(retrieval));
    histogram!(format!("{}_generation_attempts", METRICS_PREFIX)).record(f64::from(generation));
}

/// Record one executed pipeline stage
pub fn record_stage(stage: &str) {
    counter!(
        format!("{}_pipeline_stages_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Record a fail-closed fallback, labelled by the call that failed
pub fn record_fallback(kind: &str) {
    counter!(
        format!("{}_fallbacks_total", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record relevance grading results for one grading pass
pub fn record_grading(relevant: usize, irrelevant: usize) {
    counter!(
        format!("{}_documents_graded_total", METRICS_PREFIX),
        "verdict" => "yes"
    )
    .increment(relevant as u64);

    counter!(
        format!("{}_documents_graded_total", METRICS_PREFIX),
        "verdict" => "no"
    )
    .increment(irrelevant as u64);
}

pub fn record_blank_documents_dropped(count: usize) {
    if count > 0 {
        counter!(format!("{}_blank_documents_dropped_total", METRICS_PREFIX))
            .increment(count as u64);
    }
}

pub fn record_web_search(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_web_searches_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Helper to record LLM call metrics
pub fn record_llm_call(role: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        "role" => role.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        "role" => role.to_string()
    )
    .record(duration_secs);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}
