//! Metrics for the pricing and optimization pipeline.
//!
//! Counters and histograms cover:
//! - Aggregation cycle latency and per-adapter outcomes
//! - Points dropped by validation and staleness eviction
//! - Solve latency, cache hits and coalesced solves
//! - Opportunities emitted and suppressed

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

// === Metric Name Constants ===

/// Aggregation cycle latency metric name.
pub const METRIC_CYCLE_LATENCY: &str = "pricing_cycle_latency_ms";
/// Adapter fetch latency metric name.
pub const METRIC_ADAPTER_FETCH_LATENCY: &str = "adapter_fetch_latency_ms";
/// Solve latency metric name.
pub const METRIC_SOLVE_LATENCY: &str = "solve_latency_ms";
/// Points merged counter metric name.
pub const METRIC_POINTS_MERGED: &str = "price_points_merged_total";
/// Points dropped by validation counter metric name.
pub const METRIC_POINTS_DROPPED: &str = "price_points_dropped_total";
/// Stale entries evicted counter metric name.
pub const METRIC_STALE_EVICTED: &str = "stale_entries_evicted_total";
/// Adapter failures counter metric name.
pub const METRIC_ADAPTER_FAILURES: &str = "adapter_failures_total";
/// Adapter quarantines counter metric name.
pub const METRIC_ADAPTER_QUARANTINED: &str = "adapter_quarantined_total";
/// Solves completed counter metric name.
pub const METRIC_SOLVES_COMPLETED: &str = "solves_completed_total";
/// Solution cache hits counter metric name.
pub const METRIC_CACHE_HITS: &str = "solution_cache_hits_total";
/// Coalesced solve attachments counter metric name.
pub const METRIC_SOLVES_COALESCED: &str = "solves_coalesced_total";
/// Opportunities emitted counter metric name.
pub const METRIC_OPPORTUNITIES_EMITTED: &str = "opportunities_emitted_total";
/// Opportunities suppressed by cooldown counter metric name.
pub const METRIC_OPPORTUNITIES_SUPPRESSED: &str = "opportunities_suppressed_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_CYCLE_LATENCY,
        "Aggregation cycle wall-clock latency in milliseconds"
    );
    describe_histogram!(
        METRIC_ADAPTER_FETCH_LATENCY,
        "Per-adapter pricing fetch latency in milliseconds"
    );
    describe_histogram!(METRIC_SOLVE_LATENCY, "MILP solve latency in milliseconds");

    describe_counter!(METRIC_POINTS_MERGED, "Price points merged into the table");
    describe_counter!(
        METRIC_POINTS_DROPPED,
        "Price points dropped by validation (non-positive or spot > on-demand)"
    );
    describe_counter!(
        METRIC_STALE_EVICTED,
        "Entries evicted for exceeding the staleness ceiling"
    );
    describe_counter!(METRIC_ADAPTER_FAILURES, "Adapter fetch failures by kind");
    describe_counter!(
        METRIC_ADAPTER_QUARANTINED,
        "Adapters quarantined after authentication failures"
    );
    describe_counter!(METRIC_SOLVES_COMPLETED, "Solves completed by status");
    describe_counter!(METRIC_CACHE_HITS, "Solution cache hits");
    describe_counter!(
        METRIC_SOLVES_COALESCED,
        "Callers attached to an in-flight solve"
    );
    describe_counter!(METRIC_OPPORTUNITIES_EMITTED, "Arbitrage opportunities emitted");
    describe_counter!(
        METRIC_OPPORTUNITIES_SUPPRESSED,
        "Arbitrage opportunities suppressed by pair cooldown"
    );

    debug!("Metrics initialized");
}

/// Record one aggregation cycle's latency.
pub fn record_cycle_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_CYCLE_LATENCY).record(latency_ms);
}

/// Record a single adapter fetch's latency.
pub fn record_adapter_fetch_latency(start: Instant, provider: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_ADAPTER_FETCH_LATENCY, "provider" => provider.to_string())
        .record(latency_ms);
}

/// Record a solve's latency labeled by outcome status.
pub fn record_solve_latency(start: Instant, status: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_SOLVE_LATENCY, "status" => status.to_string()).record(latency_ms);
}

/// Count points merged into the table for a provider.
pub fn inc_points_merged(provider: &str, count: u64) {
    counter!(METRIC_POINTS_MERGED, "provider" => provider.to_string()).increment(count);
}

/// Count points dropped by validation.
pub fn inc_points_dropped(provider: &str, count: u64) {
    counter!(METRIC_POINTS_DROPPED, "provider" => provider.to_string()).increment(count);
}

/// Count stale entries evicted.
pub fn inc_stale_evicted(count: u64) {
    counter!(METRIC_STALE_EVICTED).increment(count);
}

/// Count an adapter failure by error code.
pub fn inc_adapter_failure(provider: &str, code: &'static str) {
    counter!(METRIC_ADAPTER_FAILURES, "provider" => provider.to_string(), "kind" => code)
        .increment(1);
}

/// Count an adapter quarantine.
pub fn inc_adapter_quarantined(provider: &str) {
    counter!(METRIC_ADAPTER_QUARANTINED, "provider" => provider.to_string()).increment(1);
}

/// Count a completed solve by status.
pub fn inc_solves_completed(status: &str) {
    counter!(METRIC_SOLVES_COMPLETED, "status" => status.to_string()).increment(1);
}

/// Count a solution cache hit.
pub fn inc_cache_hit() {
    counter!(METRIC_CACHE_HITS).increment(1);
}

/// Count a caller attaching to an in-flight solve.
pub fn inc_solves_coalesced() {
    counter!(METRIC_SOLVES_COALESCED).increment(1);
}

/// Count an emitted opportunity.
pub fn inc_opportunities_emitted() {
    counter!(METRIC_OPPORTUNITIES_EMITTED).increment(1);
}

/// Count a cooldown-suppressed opportunity.
pub fn inc_opportunities_suppressed() {
    counter!(METRIC_OPPORTUNITIES_SUPPRESSED).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.metric_name).record(latency_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 9.0); // Allow some tolerance
    }
}
