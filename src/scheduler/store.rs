//! Store and handler capabilities consumed by the worker pool.
//!
//! These traits are the leaves of the dependency graph: the pool depends on
//! them, and concrete queue adapters and job handlers implement them without
//! knowing about the pool.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A dequeued unit of work.
pub trait Record: Send + Sync + 'static {
    /// Identifier used when reporting the outcome back to the store.
    fn id(&self) -> i64;
}

/// Source of work and sink for outcomes.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Record type handed out by `dequeue`.
    type Record: Record;
    /// Error raised by the backing queue.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Claims at most one record. `Ok(None)` means the queue is empty.
    async fn dequeue(&self) -> Result<Option<Self::Record>, Self::Error>;

    /// Reports successful processing. Returns whether the report was handled.
    async fn mark_complete(&self, id: i64) -> Result<bool, Self::Error>;

    /// Reports a failure with its message. Returns whether the report was handled.
    async fn mark_errored(&self, id: i64, failure_message: &str) -> Result<bool, Self::Error>;

    /// Hands a record back to the pending set without marking it errored.
    ///
    /// Stores that cannot requeue return `Ok(false)`; the claim is then left
    /// for the queue service to reset.
    async fn requeue(&self, _id: i64, _reason: &str) -> Result<bool, Self::Error> {
        Ok(false)
    }

    /// Called once per dequeue/processing cycle after the outcome is reported.
    async fn done(&self, _id: i64) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// How the pool reports a failed handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Report the record as errored.
    Errored,
    /// Return the record to the pending set; it was never attempted.
    Requeue,
    /// Report nothing; the record stays claimed until the queue resets it.
    Abandon,
}

impl Disposition {
    /// Label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Errored => "errored",
            Disposition::Requeue => "requeued",
            Disposition::Abandon => "abandoned",
        }
    }
}

/// Error type returned by a [`Handler`].
pub trait HandlerError: std::error::Error + Send + Sync + 'static {
    /// Classifies the failure. Defaults to a permanent error.
    fn disposition(&self) -> Disposition {
        Disposition::Errored
    }
}

/// Processes one record at a time.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Record type this handler accepts.
    type Record: Record;
    /// Failure type, classified through [`HandlerError::disposition`].
    type Error: HandlerError;

    /// Processes `record`. Implementations must observe `cancel` at their
    /// blocking points and clean up before returning.
    async fn handle(
        &self,
        cancel: &CancellationToken,
        record: &Self::Record,
    ) -> Result<(), Self::Error>;
}

/// Renders an error and its source chain as a single message.
pub fn failure_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("inner failure")]
    struct Inner;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] Inner);

    #[test]
    fn test_failure_message_joins_source_chain() {
        let err = Outer(Inner);
        assert_eq!(failure_message(&err), "outer failure: inner failure");
    }

    #[test]
    fn test_disposition_labels() {
        assert_eq!(Disposition::Errored.as_str(), "errored");
        assert_eq!(Disposition::Requeue.as_str(), "requeued");
        assert_eq!(Disposition::Abandon.as_str(), "abandoned");
    }
}
