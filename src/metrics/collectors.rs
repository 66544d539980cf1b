//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op for metrics that have not been initialized, so
//! library code and tests can record freely without a registry.

use super::prometheus::{
    BUDGET_REMAINING, DEQUEUE_ERRORS, HEARTBEATS_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION,
};

/// Metrics collector for recording indexer operational metrics.
///
/// # Example
///
/// ```ignore
/// use precise_indexer::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_job("completed", 42.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record one handled job.
    ///
    /// # Arguments
    ///
    /// * `outcome` - `completed`, `errored`, `requeued` or `abandoned`
    /// * `duration_secs` - Handler duration in seconds
    pub fn record_job(&self, outcome: &str, duration_secs: f64) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[outcome]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[outcome])
                .observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Set the number of jobs currently being processed.
    pub fn set_jobs_in_progress(&self, count: u64) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.set(count as f64);
        }
    }

    /// Set the remaining admission budget.
    pub fn set_budget_remaining(&self, remaining: i64) {
        if let Some(gauge) = BUDGET_REMAINING.get() {
            gauge.set(remaining);
        }
    }

    /// Record a failed dequeue attempt.
    pub fn record_dequeue_error(&self) {
        if let Some(counter) = DEQUEUE_ERRORS.get() {
            counter.inc();
        }
    }

    /// Record a heartbeat attempt.
    pub fn record_heartbeat(&self, success: bool) {
        let status = if success { "success" } else { "failure" };
        if let Some(counter) = HEARTBEATS_TOTAL.get() {
            counter.with_label_values(&[status]).inc();
        }
    }
}
