//! In-process queue with the same claim semantics as the queue service.
//!
//! Useful for tests and local dry runs: a claimed job is never handed out
//! again until it is requeued, and reporting on a job that is not claimed
//! fails with [`QueueError::Conflict`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::client::{QueueClient, QueueError};
use super::job::Job;

/// A terminal report received by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: i64,
    /// `None` for a completed job, the failure message for an errored one.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Job>,
    claimed: HashMap<i64, Job>,
    completions: Vec<Completion>,
    requeues: Vec<(i64, String)>,
    heartbeats: Vec<Vec<i64>>,
    dequeues: u64,
}

/// Queue held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue holding `jobs` in order.
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let queue = Self::new();
        for job in jobs {
            queue.enqueue(job);
        }
        queue
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a pending job.
    pub fn enqueue(&self, job: Job) {
        self.state().pending.push_back(job);
    }

    /// Number of jobs waiting to be claimed.
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Ids of jobs currently claimed, sorted.
    pub fn claimed_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.state().claimed.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Terminal reports in the order they were received.
    pub fn completions(&self) -> Vec<Completion> {
        self.state().completions.clone()
    }

    /// Requeue requests as `(id, reason)` in the order they were received.
    pub fn requeues(&self) -> Vec<(i64, String)> {
        self.state().requeues.clone()
    }

    /// Heartbeat payloads in the order they were received.
    pub fn heartbeats(&self) -> Vec<Vec<i64>> {
        self.state().heartbeats.clone()
    }

    /// Number of successful claims so far.
    pub fn dequeue_count(&self) -> u64 {
        self.state().dequeues
    }

    /// True when nothing is pending or claimed.
    pub fn is_drained(&self) -> bool {
        let state = self.state();
        state.pending.is_empty() && state.claimed.is_empty()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut state = self.state();
        let Some(job) = state.pending.pop_front() else {
            return Ok(None);
        };
        state.claimed.insert(job.id, job.clone());
        state.dequeues += 1;
        Ok(Some(job))
    }

    async fn complete(&self, id: i64, error: Option<&str>) -> Result<(), QueueError> {
        let mut state = self.state();
        if state.claimed.remove(&id).is_none() {
            return Err(QueueError::Conflict(id));
        }
        state.completions.push(Completion {
            id,
            error: error.map(str::to_string),
        });
        Ok(())
    }

    async fn requeue(&self, id: i64, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state();
        let job = state.claimed.remove(&id).ok_or(QueueError::Conflict(id))?;
        state.pending.push_back(job);
        state.requeues.push((id, reason.to_string()));
        Ok(())
    }

    async fn heartbeat(&self, ids: &[i64]) -> Result<(), QueueError> {
        self.state().heartbeats.push(ids.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: i64) -> Job {
        Job::new(id, "acme/widgets", "abcd1234")
    }

    #[tokio::test]
    async fn test_dequeue_claims_in_order() {
        let queue = MemoryQueue::with_jobs([job(1), job(2)]);

        assert_eq!(queue.dequeue().await.unwrap().map(|j| j.id), Some(1));
        assert_eq!(queue.dequeue().await.unwrap().map(|j| j.id), Some(2));
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.claimed_ids(), vec![1, 2]);
        assert_eq!(queue.dequeue_count(), 2);
    }

    #[tokio::test]
    async fn test_completed_job_is_never_dequeued_again() {
        let queue = MemoryQueue::with_jobs([job(7)]);
        let claimed = queue.dequeue().await.unwrap().unwrap();

        queue.complete(claimed.id, None).await.unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert!(queue.is_drained());
        assert_eq!(
            queue.completions(),
            vec![Completion { id: 7, error: None }]
        );
    }

    #[tokio::test]
    async fn test_second_complete_conflicts() {
        let queue = MemoryQueue::with_jobs([job(3)]);
        queue.dequeue().await.unwrap();

        queue.complete(3, Some("boom")).await.unwrap();
        let err = queue.complete(3, None).await.unwrap_err();

        assert!(matches!(err, QueueError::Conflict(3)));
        assert_eq!(queue.completions().len(), 1);
        assert_eq!(queue.completions()[0].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_complete_unclaimed_conflicts() {
        let queue = MemoryQueue::with_jobs([job(1)]);
        let err = queue.complete(1, None).await.unwrap_err();
        assert!(matches!(err, QueueError::Conflict(1)));
        assert_eq!(queue.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_requeue_returns_job_to_pending() {
        let queue = MemoryQueue::with_jobs([job(9)]);
        queue.dequeue().await.unwrap();

        queue.requeue(9, "over budget").await.unwrap();

        assert!(queue.claimed_ids().is_empty());
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.requeues(), vec![(9, "over budget".to_string())]);
        assert!(matches!(
            queue.requeue(9, "again").await,
            Err(QueueError::Conflict(9))
        ));
    }

    #[tokio::test]
    async fn test_heartbeats_are_recorded() {
        let queue = MemoryQueue::new();
        queue.heartbeat(&[1, 2]).await.unwrap();
        queue.heartbeat(&[]).await.unwrap();
        assert_eq!(queue.heartbeats(), vec![vec![1, 2], vec![]]);
    }
}
