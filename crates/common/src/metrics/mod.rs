//! Metrics and observability utilities
//!
//! Provides metrics-rs counters and histograms for plan execution,
//! validation, fallback and snapshot refreshes.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all CAIG metrics
pub const METRICS_PREFIX: &str = "caig";

/// Histogram buckets for backend execution latency (in seconds)
pub const EXECUTION_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_plan_executions_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of executed query plans"
    );

    describe_histogram!(
        format!("{}_plan_execution_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Backend execution latency in seconds"
    );

    describe_histogram!(
        format!("{}_plan_execution_cost", METRICS_PREFIX),
        Unit::Count,
        "Backend-reported or estimated execution cost"
    );

    describe_counter!(
        format!("{}_plan_rejections_total", METRICS_PREFIX),
        Unit::Count,
        "Plans rejected before reaching a backend"
    );

    describe_counter!(
        format!("{}_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Retrieval attempts that fell through to the next strategy"
    );

    describe_counter!(
        format!("{}_strategy_selections_total", METRICS_PREFIX),
        Unit::Count,
        "Rule-based strategy selections"
    );

    describe_counter!(
        format!("{}_snapshot_refreshes_total", METRICS_PREFIX),
        Unit::Count,
        "Catalog and schema context snapshot refreshes"
    );

    tracing::info!("Metrics registered");
}

/// Record a plan that reached a backend
pub fn record_execution(strategy: &str, backend: &str, duration_secs: f64, cost: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_plan_executions_total", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "backend" => backend.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_plan_execution_duration_seconds", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .record(duration_secs);

    histogram!(
        format!("{}_plan_execution_cost", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .record(cost);
}

/// Record a plan rejected by admission checks
pub fn record_rejection(strategy: &str, reason: &str) {
    counter!(
        format!("{}_plan_rejections_total", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a fallback from one strategy to the next
pub fn record_fallback(from: &str, to: &str) {
    counter!(
        format!("{}_fallbacks_total", METRICS_PREFIX),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record the outcome of rule-based strategy selection
pub fn record_strategy(strategy: &str) {
    counter!(
        format!("{}_strategy_selections_total", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

/// Record a snapshot refresh
pub fn record_refresh(snapshot: &str, changed: bool) {
    counter!(
        format!("{}_snapshot_refreshes_total", METRICS_PREFIX),
        "snapshot" => snapshot.to_string(),
        "changed" => changed.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_buckets() {
        let mut prev = 0.0;
        for &bucket in EXECUTION_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: calls are no-ops and must not panic
        register_metrics();
        record_execution("ENTITY_FIRST", "documents", 0.01, 2.5, true);
        record_rejection("CONTRACT_DIRECT", "low_confidence");
        record_fallback("GRAPH_TRAVERSAL", "VECTOR_SEARCH");
        record_strategy("VECTOR_SEARCH");
        record_refresh("catalog", false);
    }
}
