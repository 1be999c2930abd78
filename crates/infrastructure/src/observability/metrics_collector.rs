//! Metrics collector for the statistics aggregation scheduler

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use stats_core::RunResult;
use tracing::debug;

/// Metrics collector for aggregation runs and the dirty set
pub struct MetricsCollector {
    agents_processed_total: Counter,
    agents_failed_total: Counter,
    run_duration: Histogram,
    dirty_agents: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            agents_processed_total: counter!("stats_aggregation_agents_processed_total"),
            agents_failed_total: counter!("stats_aggregation_agents_failed_total"),
            run_duration: histogram!("stats_aggregation_run_duration_seconds"),
            dirty_agents: gauge!("stats_dirty_agents"),
        }
    }

    /// Record a finished run, successful or not
    pub fn record_run(&self, result: &RunResult) {
        let mode = result.mode.as_str();
        counter!("stats_aggregation_runs_total", "mode" => mode).increment(1);
        if !result.success {
            counter!("stats_aggregation_failed_runs_total", "mode" => mode).increment(1);
        }

        self.agents_processed_total.increment(result.processed_count as u64);
        self.agents_failed_total.increment(result.failed_count as u64);
        self.run_duration.record(result.duration_ms as f64 / 1000.0);

        debug!(
            mode = mode,
            success = result.success,
            processed = result.processed_count,
            failed = result.failed_count,
            duration_ms = result.duration_ms,
            "Aggregation run recorded"
        );
    }

    /// Record a trigger that did not start a run
    pub fn record_skipped_trigger(&self, trigger: &'static str, reason: &'static str) {
        counter!(
            "stats_skipped_triggers_total",
            "trigger" => trigger,
            "reason" => reason
        )
        .increment(1);
    }

    pub fn set_dirty_agents(&self, count: usize) {
        self.dirty_agents.set(count as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
