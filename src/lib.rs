//! precise-indexer: distributed precise code-intelligence indexing worker.
//!
//! A pool of workers pulls "index this repository at this commit" jobs from
//! a central queue, fetches the commit into a throwaway workspace, runs the
//! indexer and uploader in a container sandbox, and reports the outcome.

pub mod admission;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod indexer;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use config::{ConfigError, IndexerConfig};
pub use error::{CommandError, IndexerError};
pub use queue::{Job, QueueClient, QueueError};
