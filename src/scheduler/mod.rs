//! Generic polling worker pool.
//!
//! The pool is parameterised over two capabilities:
//!
//! - **Store**: `dequeue`, `mark_complete`, `mark_errored`, `requeue`, `done`
//! - **Handler**: `handle`
//!
//! Both are strategy objects injected at construction time, so the same pool
//! drives any kind of job.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │    Store     │
//!                      │ (queue shim) │
//!                      └──────┬───────┘
//!                             │ dequeue / report
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Slot 1  │         │ Slot 2  │         │ Slot N  │
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └───────────────────┼───────────────────┘
//!                             ▼
//!                      ┌──────────────┐
//!                      │   Handler    │
//!                      └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use precise_indexer::scheduler::{WorkerPool, WorkerPoolConfig};
//!
//! let cancel = CancellationToken::new();
//! let config = WorkerPoolConfig::new(4).with_poll_interval(Duration::from_secs(1));
//! let mut pool = WorkerPool::new(config, Arc::new(store), Arc::new(handler), &cancel);
//! pool.start()?;
//!
//! // Graceful shutdown
//! pool.shutdown().await?;
//! ```

pub mod store;
pub mod worker_pool;

pub use store::{failure_message, Disposition, Handler, HandlerError, Record, Store};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
