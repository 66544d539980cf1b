//! Queue client contract shared by the HTTP and in-memory implementations.

use async_trait::async_trait;
use thiserror::Error;

use super::job::Job;

/// Errors that can occur while talking to the queue service.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The configured queue URL cannot be used.
    #[error("Invalid queue URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request never produced a response.
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with an unexpected status.
    #[error("Queue service returned HTTP {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("Failed to decode queue response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The job is not currently claimed by this client.
    #[error("Job {0} is not claimed by this worker")]
    Conflict(i64),
}

/// Operations a worker performs against the central queue.
#[async_trait]
pub trait QueueClient: Send + Sync + 'static {
    /// Atomically claims at most one pending job.
    ///
    /// `Ok(None)` means the queue is empty; that is not an error.
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Reports the terminal outcome of a claimed job.
    ///
    /// `error: None` marks the job completed; `Some(message)` marks it
    /// errored and keeps the message for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Conflict` if the job is not claimed by this client.
    async fn complete(&self, id: i64, error: Option<&str>) -> Result<(), QueueError>;

    /// Releases the claim on a job so it becomes pending again.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Conflict` if the job is not claimed by this client.
    async fn requeue(&self, id: i64, reason: &str) -> Result<(), QueueError>;

    /// Reports the ids this worker is currently processing.
    async fn heartbeat(&self, ids: &[i64]) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::Conflict(42);
        assert!(err.to_string().contains("42"));

        let err = QueueError::UnexpectedStatus {
            status: 500,
            body: "database is down".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("database is down"));

        let err = QueueError::InvalidUrl {
            url: "nope".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert!(err.to_string().contains("nope"));
    }
}
