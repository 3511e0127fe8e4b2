//! Job infrastructure for background pipeline execution.
//!
//! - [`JobQueue`] - leased, prioritized, at-least-once queue contract
//! - [`InMemoryJobQueue`] / [`PostgresJobQueue`] - its two backends
//! - [`JobRegistry`] - one handler per [`JobKind`]
//! - [`WorkerPool`] - fixed-size pool of dequeue → handle → ack loops
//!
//! # Architecture
//!
//! ```text
//! action (create_task)
//!     │
//!     └─► enqueue_command(queue, CollectCommentsJob)
//!
//! WorkerPool
//!     │
//!     ├─► dequeue (lease)
//!     ├─► JobRegistry.execute(job) ─► domain handler
//!     └─► ack / nack(retriable) / release
//! ```
//!
//! Handlers and their payload types live in their domains; this module only
//! provides the infrastructure.

mod error;
mod job;
mod memory;
mod postgres;
mod queue;
mod registry;
mod worker;

pub use error::{JobError, JobResult};
pub use job::{Job, JobKind, JobPriority, JobStatus};
pub use memory::InMemoryJobQueue;
pub use postgres::PostgresJobQueue;
pub use queue::{
    enqueue_command, EnqueueOptions, EnqueueResult, JobCommand, JobQueue, NackOutcome,
    QueueConfig, DEFAULT_QUEUE,
};
pub use registry::{JobContext, JobRegistry};
pub use worker::{WorkerPool, WorkerPoolConfig};
