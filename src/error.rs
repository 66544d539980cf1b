//! Error types for job execution.
//!
//! Queue, pool and configuration errors live next to the code that raises
//! them; this module holds the errors of the execution path:
//! - External command failures (git, docker)
//! - Index job failures and how the pool should treat them

use thiserror::Error;

use crate::scheduler::{Disposition, HandlerError};

/// Errors raised while running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn `{program}`: {error}")]
    Spawn {
        program: String,
        error: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Command cancelled")]
    Cancelled,
}

impl CommandError {
    /// True when the command was aborted by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandError::Cancelled)
    }
}

/// Errors that can occur while processing an index job.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("failed to build clone URL for '{repo}': {reason}")]
    CloneUrl { repo: String, reason: String },

    #[error("failed to create workspace")]
    Workspace(#[source] std::io::Error),

    #[error("failed `{step}`")]
    Fetch {
        step: String,
        #[source]
        source: CommandError,
    },

    #[error("failed to index repository")]
    Index(#[source] CommandError),

    #[error("job cost {cost} exceeds remaining budget {remaining}")]
    Rejected { cost: i64, remaining: i64 },

    #[error("job cancelled")]
    Cancelled,
}

impl HandlerError for IndexerError {
    fn disposition(&self) -> Disposition {
        match self {
            IndexerError::Rejected { .. } => Disposition::Requeue,
            IndexerError::Cancelled => Disposition::Abandon,
            _ => Disposition::Errored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::failure_message;

    #[test]
    fn test_disposition_mapping() {
        let rejected = IndexerError::Rejected {
            cost: 60,
            remaining: 40,
        };
        assert_eq!(rejected.disposition(), Disposition::Requeue);
        assert_eq!(IndexerError::Cancelled.disposition(), Disposition::Abandon);
        assert_eq!(
            IndexerError::Index(CommandError::Cancelled).disposition(),
            Disposition::Errored
        );
        assert_eq!(
            IndexerError::InvalidJob("empty commit".into()).disposition(),
            Disposition::Errored
        );
    }

    #[test]
    fn test_fetch_failure_message_includes_cause() {
        let err = IndexerError::Fetch {
            step: "git -C /tmp/ws checkout deadbeef".to_string(),
            source: CommandError::NonZeroExit {
                program: "git".to_string(),
                status: "exit status: 128".to_string(),
                stderr: "fatal: reference is not a tree".to_string(),
            },
        };

        let message = failure_message(&err);
        assert!(message.starts_with("failed `git -C /tmp/ws checkout deadbeef`: "));
        assert!(message.contains("fatal: reference is not a tree"));
    }

    #[test]
    fn test_index_failure_message() {
        let err = IndexerError::Index(CommandError::NonZeroExit {
            program: "docker".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "upload failed".to_string(),
        });
        let message = failure_message(&err);
        assert!(message.starts_with("failed to index repository: "));
        assert!(message.contains("upload failed"));
    }
}
