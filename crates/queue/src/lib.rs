//! In-memory job queue with scheduling, retry, and dead-letter handling.
//!
//! ## Design
//!
//! - Jobs live on named queues and are claimed FIFO
//! - Scheduled jobs sit in a scheduled set until they are due
//! - Retry policy with backoff, driven by the `retry` job option
//! - Dead-letter queue for jobs that exhaust their retries
//!
//! ## Components
//!
//! - `Job` / `JobPayload`: what callers submit and what workers receive
//! - `JobQueue`: the queue contract (enqueue-now, schedule-at, claim)
//! - `InMemoryJobQueue`: reference implementation for tests/dev
//! - `Worker`: runs jobs with handlers registered per job class

pub mod store;
pub mod types;
pub mod worker;

pub use store::{InMemoryJobQueue, JobQueue, QueueError};
pub use types::{
    DeadLetterEntry, Job, JobAttemptRecord, JobPayload, JobResult, JobStatus, RetryPolicy,
};
pub use worker::{Worker, WorkerConfig, WorkerHandle, WorkerStats};
