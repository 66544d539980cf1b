//! Precise code-intel indexer.
//!
//! Wires the generic worker pool to the queue service:
//!
//! - [`QueueStore`] turns a [`QueueClient`] into the pool's store
//! - [`IndexHandler`] runs each job through admission, fetch and the sandbox
//! - [`spawn_heartbeat`] reports in-flight ids while the pool runs
//!
//! [`Indexer`] owns all of them for one process.

pub mod handler;
pub mod heartbeat;
pub mod store_shim;

pub use handler::{HandlerOptions, IndexHandler};
pub use heartbeat::spawn_heartbeat;
pub use store_shim::QueueStore;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admission::{AdmissionController, CostModel, FixedCost};
use crate::config::IndexerConfig;
use crate::execution::Commander;
use crate::queue::QueueClient;
use crate::registry::JobRegistry;
use crate::scheduler::{PoolError, PoolStats, WorkerPool};

/// One indexer process: worker pool plus its background tasks.
pub struct Indexer<C: QueueClient + ?Sized> {
    pool: WorkerPool<QueueStore<C>, IndexHandler>,
    client: Arc<C>,
    registry: Arc<JobRegistry>,
    admission: AdmissionController,
    config: IndexerConfig,
    cancel: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl<C: QueueClient + ?Sized> Indexer<C> {
    /// Creates an indexer charging every job a fixed cost of one.
    pub fn new(
        config: IndexerConfig,
        client: Arc<C>,
        commander: Arc<dyn Commander>,
        cancel: &CancellationToken,
    ) -> Self {
        Self::with_cost_model(config, client, commander, Arc::new(FixedCost::default()), cancel)
    }

    /// Creates an indexer with a custom cost model.
    ///
    /// Budgeting is only active when `config.budget_max` is positive.
    pub fn with_cost_model(
        config: IndexerConfig,
        client: Arc<C>,
        commander: Arc<dyn Commander>,
        cost_model: Arc<dyn CostModel>,
        cancel: &CancellationToken,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let admission = AdmissionController::with_budget(config.budget_max, cost_model);
        let handler = IndexHandler::new(
            HandlerOptions::from_config(&config),
            Arc::clone(&registry),
            admission.clone(),
            commander,
        );
        let cancel = cancel.child_token();
        let pool = WorkerPool::new(
            config.pool_config(),
            Arc::new(QueueStore::new(Arc::clone(&client))),
            Arc::new(handler),
            &cancel,
        );

        Self {
            pool,
            client,
            registry,
            admission,
            config,
            cancel,
            background: Vec::new(),
        }
    }

    /// Starts the worker pool, the heartbeat and the budget reset task.
    ///
    /// # Errors
    ///
    /// Returns the pool's error if it cannot start.
    pub fn start(&mut self) -> Result<(), PoolError> {
        self.pool.start()?;

        if let Some(interval) = self.config.heartbeat_interval {
            self.background.push(spawn_heartbeat(
                Arc::clone(&self.client),
                Arc::clone(&self.registry),
                interval,
                self.cancel.child_token(),
            ));
        }

        if let Some(interval) = self.config.budget_reset_interval {
            if let Some(handle) = self
                .admission
                .spawn_periodic_reset(interval, self.cancel.child_token())
            {
                self.background.push(handle);
            }
        }

        info!(
            worker = %self.config.worker_name,
            num_workers = self.config.num_workers,
            budget_max = self.config.budget_max,
            "Indexer started"
        );
        Ok(())
    }

    /// Waits until the pool stops, which happens once cancellation fires.
    pub async fn wait(&mut self) {
        self.pool.wait().await;
        self.stop_background().await;
    }

    /// Stops the pool, waiting up to the configured timeout for in-flight
    /// jobs, then stops the background tasks.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if jobs did not finish in time.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        let result = self.pool.shutdown().await;
        self.stop_background().await;
        result
    }

    async fn stop_background(&mut self) {
        self.cancel.cancel();
        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Background task panicked");
            }
        }
    }

    /// Ids of jobs currently being processed.
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Admission controller shared by all slots.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Whether the pool is running.
    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }
}
