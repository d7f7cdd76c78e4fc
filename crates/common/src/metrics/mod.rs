//! Metrics and observability utilities
//!
//! Provides Prometheus-friendly metrics with standardized naming
//! for the retrieval, augmentation and scheduling pipelines.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DragonGPT metrics
pub const METRICS_PREFIX: &str = "dragongpt";

/// Histogram buckets for request latency (in seconds)
/// Answer generation streams for several seconds, so the tail is long.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010, // 10ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 60s
];

/// Buckets for upstream calls (index, embedding, search, fetch)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
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

    // Retrieval metrics
    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Vector index query latency in seconds"
    );

    describe_counter!(
        format!("{}_retrieval_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Vector index queries that failed and degraded to empty context"
    );

    // Augmentation metrics
    describe_counter!(
        format!("{}_sufficiency_checks_total", METRICS_PREFIX),
        Unit::Count,
        "Sufficiency oracle verdicts by outcome"
    );

    describe_counter!(
        format!("{}_search_results_total", METRICS_PREFIX),
        Unit::Count,
        "Web search results merged into context"
    );

    describe_counter!(
        format!("{}_pages_fetched_total", METRICS_PREFIX),
        Unit::Count,
        "Pages fetched and merged into context"
    );

    describe_counter!(
        format!("{}_context_truncations_total", METRICS_PREFIX),
        Unit::Count,
        "Contexts cut down to the character cap"
    );

    // Answer metrics
    describe_counter!(
        format!("{}_answers_streamed_total", METRICS_PREFIX),
        Unit::Count,
        "Answers streamed to completion"
    );

    // Embedding metrics
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

    // Scheduler metrics
    describe_counter!(
        format!("{}_schedule_rows_total", METRICS_PREFIX),
        Unit::Count,
        "Course offering rows kept or dropped by normalization"
    );

    // Indexer metrics
    describe_counter!(
        format!("{}_vectors_upserted_total", METRICS_PREFIX),
        Unit::Count,
        "Vectors upserted into the index"
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

/// Helper to record vector index retrieval
pub fn record_retrieval(duration_secs: f64, success: bool) {
    histogram!(format!("{}_retrieval_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    if !success {
        counter!(format!("{}_retrieval_errors_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record a sufficiency verdict ("sufficient", "insufficient", "error")
pub fn record_sufficiency(outcome: &str) {
    counter!(
        format!("{}_sufficiency_checks_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record what an escalation merged into the context
pub fn record_escalation(search_results: usize, pages_fetched: usize, truncated: bool) {
    counter!(format!("{}_search_results_total", METRICS_PREFIX)).increment(search_results as u64);
    counter!(format!("{}_pages_fetched_total", METRICS_PREFIX)).increment(pages_fetched as u64);

    if truncated {
        counter!(format!("{}_context_truncations_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record a completed answer stream
pub fn record_answer(chars: usize) {
    counter!(format!("{}_answers_streamed_total", METRICS_PREFIX)).increment(1);
    tracing::trace!(chars, "Answer recorded");
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
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

/// Helper to record scheduler normalization results
pub fn record_schedule(kept: usize, dropped: usize) {
    counter!(
        format!("{}_schedule_rows_total", METRICS_PREFIX),
        "result" => "kept"
    )
    .increment(kept as u64);

    counter!(
        format!("{}_schedule_rows_total", METRICS_PREFIX),
        "result" => "dropped"
    )
    .increment(dropped as u64);
}

/// Helper to record indexer upserts
pub fn record_upsert(count: usize, corpus: &str) {
    counter!(
        format!("{}_vectors_upserted_total", METRICS_PREFIX),
        "corpus" => corpus.to_string()
    )
    .increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, UPSTREAM_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("POST", "/query");
        std::thread::sleep(std::time::Duration::from_millis(5));
        metrics.finish(200);
        // No recorder installed; recording must still be a no-op
    }

    #[test]
    fn test_record_helpers_without_recorder() {
        record_retrieval(0.1, false);
        record_sufficiency("insufficient");
        record_escalation(3, 2, true);
        record_schedule(4, 1);
    }
}
