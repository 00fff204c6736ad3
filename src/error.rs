//! Error types for the deduplicating job scheduler.

use thiserror::Error;

/// Result type for scheduler operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors raised by the scheduler.
#[derive(Debug, Error)]
pub enum JobError {
    /// No descriptor exists for the requested `(queue, job_type)`.
    #[error("no matching job for this queue/job_type")]
    NoMatchingJobs,

    /// A waiter was cancelled via `Stop()`.
    #[error("wait aborted")]
    Aborted,

    /// A waiter's deadline elapsed before a terminal status was observed.
    #[error("wait timed out")]
    Timeout,

    /// The host worker framework failed to accept an enqueue.
    #[error("worker framework error: {0}")]
    Framework(String),

    /// Serialization/deserialization of a descriptor or message failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The underlying key-value store returned an error.
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The connection pool failed to hand out a connection.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}
