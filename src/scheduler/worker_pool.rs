//! Worker pool that polls a store and dispatches records to a handler.
//!
//! Each worker is an independent async task running a
//! poll → dispatch → report loop:
//!
//! - an idle worker calls `Store::dequeue`
//! - an empty queue (or a dequeue error) puts it to sleep for `poll_interval`
//! - a dequeued record is handed to the `Handler` inline, and the worker
//!   only polls again after the outcome has been reported and `Store::done`
//!   has run
//!
//! Claim exclusivity comes from the store's dequeue, so no two workers here
//! or in any peer process ever hold the same record.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::{failure_message, Disposition, Handler, HandlerError, Record, Store};
use crate::metrics::MetricsCollector;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Pool was configured without any workers.
    #[error("Pool needs at least one worker")]
    NoWorkers,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers (slots).
    pub num_workers: usize,
    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Prefix for worker identifiers in logs.
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(60),
            name: "worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the worker name prefix.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently holding a record.
    pub active_workers: usize,
    /// Records reported complete.
    pub jobs_completed: u64,
    /// Records reported errored.
    pub jobs_errored: u64,
    /// Records handed back to the pending set.
    pub jobs_requeued: u64,
    /// Records dropped without a report (cancelled mid-flight).
    pub jobs_abandoned: u64,
    /// Average handler duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of handled records.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_errored + self.jobs_requeued + self.jobs_abandoned
    }

    /// Returns the share of completed records among completed and errored, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.jobs_completed + self.jobs_errored;
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Final classification of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Errored,
    Requeued,
    Abandoned,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Errored => "errored",
            Outcome::Requeued => "requeued",
            Outcome::Abandoned => "abandoned",
        }
    }
}

impl From<Disposition> for Outcome {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Errored => Outcome::Errored,
            Disposition::Requeue => Outcome::Requeued,
            Disposition::Abandon => Outcome::Abandoned,
        }
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_errored: AtomicU64,
    jobs_requeued: AtomicU64,
    jobs_abandoned: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_errored: AtomicU64::new(0),
            jobs_requeued: AtomicU64::new(0),
            jobs_abandoned: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, outcome: Outcome, duration: Duration) {
        let counter = match outcome {
            Outcome::Completed => &self.jobs_completed,
            Outcome::Errored => &self.jobs_errored,
            Outcome::Requeued => &self.jobs_requeued,
            Outcome::Abandoned => &self.jobs_abandoned,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) -> u64 {
        self.active_workers.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn decrement_active(&self) -> u64 {
        self.active_workers.fetch_sub(1, Ordering::SeqCst) - 1
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let errored = self.jobs_errored.load(Ordering::SeqCst);
        let requeued = self.jobs_requeued.load(Ordering::SeqCst);
        let abandoned = self.jobs_abandoned.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + errored + requeued + abandoned;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_errored: errored,
            jobs_requeued: requeued,
            jobs_abandoned: abandoned,
            average_job_duration: average_duration,
        }
    }
}

/// Pool of workers sharing one store and one handler.
pub struct WorkerPool<S, H>
where
    S: Store,
    H: Handler<Record = S::Record>,
{
    config: WorkerPoolConfig,
    store: Arc<S>,
    handler: Arc<H>,
    cancel: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
    is_running: AtomicBool,
}

impl<S, H> WorkerPool<S, H>
where
    S: Store,
    H: Handler<Record = S::Record>,
{
    /// Creates a new worker pool.
    ///
    /// Workers stop when `cancel` (or a token derived from it by
    /// [`WorkerPool::shutdown`]) is cancelled.
    pub fn new(
        config: WorkerPoolConfig,
        store: Arc<S>,
        handler: Arc<H>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            config,
            store,
            handler,
            cancel: cancel.child_token(),
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            metrics: MetricsCollector::new(),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running and
    /// `PoolError::NoWorkers` if it was configured with zero workers.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }
        if self.config.num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("{}-{}", self.config.name, i),
                store: Arc::clone(&self.store),
                handler: Arc::clone(&self.handler),
                cancel: self.cancel.clone(),
                poll_interval: self.config.poll_interval,
                stats: Arc::clone(&self.stats),
                metrics: self.metrics.clone(),
            };

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Waits until every worker has exited, which happens once the pool's
    /// cancellation token fires.
    pub async fn wait(&mut self) {
        for handle in self.worker_handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        self.is_running.store(false, Ordering::SeqCst);
    }

    /// Cancels all workers and waits for them to finish.
    ///
    /// In-flight handlers observe the cancellation at their next blocking
    /// point and clean up; no outcome is reported for them.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");
        self.cancel.cancel();

        let timeout = self.config.shutdown_timeout;
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// A single slot that processes one record at a time.
struct Worker<S, H>
where
    S: Store,
    H: Handler<Record = S::Record>,
{
    id: String,
    store: Arc<S>,
    handler: Arc<H>,
    cancel: CancellationToken,
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl<S, H> Worker<S, H>
where
    S: Store,
    H: Handler<Record = S::Record>,
{
    /// Main worker loop. Runs until the cancellation token fires.
    async fn run(self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            let dequeued = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.store.dequeue() => result,
            };

            match dequeued {
                Ok(Some(record)) => {
                    // A requeued record would be handed straight back; back off.
                    if self.process(record).await == Outcome::Requeued && !self.idle().await {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(worker_id = %self.id, "No jobs available");
                    if !self.idle().await {
                        break;
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    self.metrics.record_dequeue_error();
                    if !self.idle().await {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Sleeps for one poll interval. Returns false if cancelled meanwhile.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.poll_interval) => true,
        }
    }

    /// Handles one record and reports its outcome.
    async fn process(&self, record: S::Record) -> Outcome {
        let job_id = record.id();
        let start_time = Instant::now();

        debug!(worker_id = %self.id, job_id, "Dispatching job");
        let active = self.stats.increment_active();
        self.metrics.set_jobs_in_progress(active);

        let result = AssertUnwindSafe(self.handler.handle(&self.cancel, &record))
            .catch_unwind()
            .await;
        let duration = start_time.elapsed();

        let active = self.stats.decrement_active();
        self.metrics.set_jobs_in_progress(active);

        let outcome = match result {
            Ok(Ok(())) => {
                self.report_complete(job_id).await;
                info!(
                    worker_id = %self.id,
                    job_id,
                    duration_ms = duration.as_millis() as u64,
                    "Job completed successfully"
                );
                Outcome::Completed
            }
            Ok(Err(e)) => self.report_failure(job_id, &e).await,
            Err(_) => {
                error!(worker_id = %self.id, job_id, "Handler panicked");
                self.report_errored(job_id, "handler panicked").await;
                Outcome::Errored
            }
        };

        self.stats.record(outcome, duration);
        self.metrics
            .record_job(outcome.as_str(), duration.as_secs_f64());

        if let Err(e) = self.store.done(job_id).await {
            warn!(worker_id = %self.id, job_id, error = %e, "Failed to finalize job");
        }

        outcome
    }

    async fn report_failure(&self, job_id: i64, err: &H::Error) -> Outcome {
        let disposition = err.disposition();
        let message = failure_message(err);

        match disposition {
            Disposition::Errored => {
                warn!(worker_id = %self.id, job_id, error = %message, "Job failed");
                self.report_errored(job_id, &message).await;
            }
            Disposition::Requeue => {
                info!(worker_id = %self.id, job_id, reason = %message, "Requeueing job");
                match self.store.requeue(job_id, &message).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(worker_id = %self.id, job_id, "Store cannot requeue; leaving job claimed")
                    }
                    Err(e) => {
                        error!(worker_id = %self.id, job_id, error = %e, "Failed to requeue job")
                    }
                }
            }
            Disposition::Abandon => {
                info!(worker_id = %self.id, job_id, reason = %message, "Abandoning job without report");
            }
        }

        disposition.into()
    }

    async fn report_complete(&self, job_id: i64) {
        match self.store.mark_complete(job_id).await {
            Ok(true) => {}
            Ok(false) => warn!(worker_id = %self.id, job_id, "Completion was not recorded"),
            Err(e) => {
                error!(worker_id = %self.id, job_id, error = %e, "Failed to mark job complete")
            }
        }
    }

    async fn report_errored(&self, job_id: i64, message: &str) {
        match self.store.mark_errored(job_id, message).await {
            Ok(true) => {}
            Ok(false) => warn!(worker_id = %self.id, job_id, "Failure was not recorded"),
            Err(e) => {
                error!(worker_id = %self.id, job_id, error = %e, "Failed to mark job errored")
            }
        }
    }
}
