//! Adapts a [`QueueClient`] to the worker pool's [`Store`] vocabulary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::queue::{Job, QueueClient, QueueError};
use crate::scheduler::Store;

/// Store backed by a queue client.
///
/// Every report is forwarded to the queue service and counts as handled;
/// `done` has nothing to release.
pub struct QueueStore<C: ?Sized> {
    client: Arc<C>,
}

impl<C: QueueClient + ?Sized> QueueStore<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// The underlying queue client.
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

#[async_trait]
impl<C: QueueClient + ?Sized> Store for QueueStore<C> {
    type Record = Job;
    type Error = QueueError;

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        self.client.dequeue().await
    }

    async fn mark_complete(&self, id: i64) -> Result<bool, QueueError> {
        self.client.complete(id, None).await?;
        Ok(true)
    }

    async fn mark_errored(&self, id: i64, failure_message: &str) -> Result<bool, QueueError> {
        self.client.complete(id, Some(failure_message)).await?;
        Ok(true)
    }

    async fn requeue(&self, id: i64, reason: &str) -> Result<bool, QueueError> {
        self.client.requeue(id, reason).await?;
        Ok(true)
    }
}
