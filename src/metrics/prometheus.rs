//! Prometheus metrics registration and export.
//!
//! Defines every metric the indexer records and provides functions for
//! initializing and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Global Prometheus registry for all indexer metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of handled jobs, labeled by outcome.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Handler duration in seconds, labeled by outcome.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of jobs currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Remaining admission budget.
pub static BUDGET_REMAINING: OnceLock<IntGauge> = OnceLock::new();

/// Total failed dequeue attempts.
pub static DEQUEUE_ERRORS: OnceLock<Counter> = OnceLock::new();

/// Total heartbeats sent, labeled by status.
pub static HEARTBEATS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Serializes initialization so every static comes from the same registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are no-ops.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let jobs_total = CounterVec::new(
        Opts::new("precise_indexer_jobs_total", "Total number of handled jobs"),
        &["outcome"],
    )?;

    let job_duration = HistogramVec::new(
        HistogramOpts::new(
            "precise_indexer_job_duration_seconds",
            "Time spent handling a single job",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
        &["outcome"],
    )?;

    let jobs_in_progress = Gauge::new(
        "precise_indexer_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    let budget_remaining = IntGauge::new(
        "precise_indexer_budget_remaining",
        "Remaining admission budget",
    )?;

    let dequeue_errors = Counter::new(
        "precise_indexer_dequeue_errors_total",
        "Total failed dequeue attempts",
    )?;

    let heartbeats_total = CounterVec::new(
        Opts::new("precise_indexer_heartbeats_total", "Total heartbeats sent"),
        &["status"],
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(budget_remaining.clone()))?;
    registry.register(Box::new(dequeue_errors.clone()))?;
    registry.register(Box::new(heartbeats_total.clone()))?;

    // Registry goes last so readers never see it before the metrics.
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = BUDGET_REMAINING.set(budget_remaining);
    let _ = DEQUEUE_ERRORS.set(dequeue_errors);
    let _ = HEARTBEATS_TOTAL.set(heartbeats_total);
    let _ = REGISTRY.set(registry);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&["completed"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("precise_indexer_jobs_total"));
    }
}
