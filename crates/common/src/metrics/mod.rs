//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use crate::arena::refresh::RefreshReport;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all PaperDuel metrics
pub const METRICS_PREFIX: &str = "paperduel";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for upstream feed fetches and pool refreshes
pub const REFRESH_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
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

    // Arena metrics
    describe_counter!(
        format!("{}_pairs_dealt_total", METRICS_PREFIX),
        Unit::Count,
        "Total paper pairs served for comparison"
    );

    describe_counter!(
        format!("{}_rotation_resets_total", METRICS_PREFIX),
        Unit::Count,
        "Times every paper was made eligible again"
    );

    describe_counter!(
        format!("{}_votes_total", METRICS_PREFIX),
        Unit::Count,
        "Total comparison outcomes applied"
    );

    describe_histogram!(
        format!("{}_rating_delta", METRICS_PREFIX),
        "Rating points transferred per vote"
    );

    // Pool refresh metrics
    describe_counter!(
        format!("{}_refreshes_total", METRICS_PREFIX),
        Unit::Count,
        "Total pool refreshes completed"
    );

    describe_counter!(
        format!("{}_refresh_papers_total", METRICS_PREFIX),
        Unit::Count,
        "Papers processed by pool refreshes, by outcome"
    );

    describe_histogram!(
        format!("{}_refresh_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pool refresh latency in seconds"
    );

    // Source metrics
    describe_counter!(
        format!("{}_source_fetches_total", METRICS_PREFIX),
        Unit::Count,
        "Total paper source fetches"
    );

    describe_histogram!(
        format!("{}_source_fetch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Paper source fetch latency in seconds"
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

pub fn record_pair_dealt() {
    counter!(format!("{}_pairs_dealt_total", METRICS_PREFIX)).increment(1);
}

pub fn record_rotation_reset() {
    counter!(format!("{}_rotation_resets_total", METRICS_PREFIX)).increment(1);
}

/// Helper to record an applied vote and the points it moved
pub fn record_vote(rating_delta: f64) {
    counter!(format!("{}_votes_total", METRICS_PREFIX)).increment(1);
    histogram!(format!("{}_rating_delta", METRICS_PREFIX)).record(rating_delta);
}

/// Helper to record pool refresh metrics
pub fn record_refresh(report: &RefreshReport, duration_secs: f64) {
    counter!(format!("{}_refreshes_total", METRICS_PREFIX)).increment(1);

    let outcomes = [
        ("evicted", report.evicted),
        ("inserted", report.inserted),
        ("skipped", report.skipped),
        ("failed", report.failed),
    ];
    for (outcome, count) in outcomes {
        counter!(
            format!("{}_refresh_papers_total", METRICS_PREFIX),
            "outcome" => outcome
        )
        .increment(count as u64);
    }

    histogram!(format!("{}_refresh_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record source fetch metrics
pub fn record_source_fetch(duration_secs: f64, source: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_source_fetches_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_source_fetch_duration_seconds", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_ascending(buckets: &[f64]) {
        let mut prev = 0.0;
        for &bucket in buckets {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_latency_buckets() {
        assert_ascending(LATENCY_BUCKETS);

        // P50 target (50ms) should be in buckets
        assert!(LATENCY_BUCKETS.contains(&0.050));
        // P99 target (150ms) should be in buckets
        assert!(LATENCY_BUCKETS.contains(&0.150));
    }

    #[test]
    fn test_refresh_buckets_cover_source_timeout() {
        assert_ascending(REFRESH_BUCKETS);
        assert!(REFRESH_BUCKETS.contains(&30.00));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a no-op
        let metrics = RequestMetrics::start("GET", "/api/papers/random");
        metrics.finish(200);
        record_pair_dealt();
        record_rotation_reset();
        record_vote(16.0);
        record_refresh(&RefreshReport::default(), 0.5);
        record_source_fetch(0.2, "static", true);
    }
}
