//! Queue client protocol.
//!
//! Workers claim jobs from, and report outcomes to, a central queue service.
//! [`QueueClient`] is the contract; [`HttpQueueClient`] speaks it over the
//! frontend's internal HTTP API and [`MemoryQueue`] keeps everything in
//! process.

pub mod client;
pub mod http;
pub mod job;
pub mod memory;

pub use client::{QueueClient, QueueError};
pub use http::HttpQueueClient;
pub use job::Job;
pub use memory::{Completion, MemoryQueue};
