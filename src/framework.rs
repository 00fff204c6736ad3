//! The minimal trait surface for the "generic background-worker framework"
//! that spec.md declares an external collaborator, plus one concrete
//! Redis-backed adapter so the crate is runnable on its own.
//!
//! Admission only depends on [`WorkerFramework`]; it never reaches into a
//! concrete queue implementation, mirroring how `arcana-jobs::queue::JobQueue`
//! is the seam its worker pool programs against.

use crate::descriptor::JobDescriptor;
use crate::error::JobResult;
use crate::keys::KeyBuilder;
use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

/// The message envelope handed to the worker framework at enqueue time, and
/// handed back to the middleware on dequeue. `x_once` carries the embedded
/// descriptor copy the middleware inspects (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub jid: String,
    pub queue: String,
    pub args: serde_json::Value,
    /// The framework's own retry counter, if it tracks one. Absent means
    /// "never retried" (mirrors the original's `-1` sentinel, modeled here
    /// as `None`).
    #[serde(default)]
    pub retry_count: Option<i64>,
    #[serde(rename = "x-once", default, skip_serializing_if = "Option::is_none")]
    pub x_once: Option<JobDescriptor>,
}

/// What the scheduler needs from the host worker framework: accept a
/// message for delivery. Everything else (serialization wire format beyond
/// this envelope, queue push mechanics, retry middleware, connection
/// pooling) is the framework's concern, not the scheduler's.
#[async_trait]
pub trait WorkerFramework: Send + Sync {
    async fn enqueue(&self, message: Message) -> JobResult<()>;
}

/// Queries the framework's retry bookkeeping for a job. Kept distinct from
/// [`WorkerFramework`] because the middleware needs to read this both
/// before and after invoking the callback (§4.4 step 3 and step 7), and a
/// fake framework in tests often wants to simulate that bookkeeping
/// independently of message delivery.
#[async_trait]
pub trait RetryProbe: Send + Sync {
    async fn retry_count(&self, jid: &str) -> Option<i64>;
}

/// A concrete, list-based [`WorkerFramework`] so the crate can be exercised
/// end to end without a second crate. Pushes the serialized [`Message`] onto
/// a Redis list named by [`KeyBuilder::queue_list`], the same `RPUSH`
/// mechanics `arcana-jobs::redis::queue::RedisJobQueue` uses for its own
/// priority queues, narrowed to a single FIFO list per queue.
pub struct RedisWorkerFramework {
    pool: Pool,
    keys: KeyBuilder,
}

impl RedisWorkerFramework {
    pub fn new(pool: Pool, keys: KeyBuilder) -> Self {
        Self { pool, keys }
    }
}

#[async_trait]
impl WorkerFramework for RedisWorkerFramework {
    async fn enqueue(&self, message: Message) -> JobResult<()> {
        let list_key = self.keys.queue_list(&message.queue);
        let payload = serde_json::to_string(&message)?;
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.rpush(list_key, payload).await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeFramework;
    use super::*;

    #[tokio::test]
    async fn fake_framework_records_messages() {
        let framework = FakeFramework::new();
        framework
            .enqueue(Message {
                jid: "jid-1".into(),
                queue: "emails".into(),
                args: serde_json::json!({"to": "a@example.com"}),
                retry_count: None,
                x_once: None,
            })
            .await
            .unwrap();
        assert_eq!(framework.messages.lock().len(), 1);
    }

    #[tokio::test]
    async fn fake_framework_can_simulate_failure() {
        let framework = FakeFramework::new();
        framework.fail_next_enqueue();
        let err = framework
            .enqueue(Message {
                jid: "jid-1".into(),
                queue: "emails".into(),
                args: serde_json::json!({}),
                retry_count: None,
                x_once: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::JobError::Framework(_)));
        assert!(framework.messages.lock().is_empty());
    }
}
