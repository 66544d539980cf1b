//! Prometheus-based monitoring.
//!
//! Records one event per handled job (outcome and duration), the number of
//! jobs in flight, the remaining admission budget, dequeue failures and
//! heartbeats.
//!
//! # Example
//!
//! ```ignore
//! use precise_indexer::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_job("completed", 12.0);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    BUDGET_REMAINING, DEQUEUE_ERRORS, HEARTBEATS_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL,
    JOB_DURATION, REGISTRY,
};
