//! oncejobs - a deduplicating job scheduler
//!
//! Layers dedup admission control, a status-transition state machine, and a
//! pub/sub-driven completion waiter on top of a generic background-worker
//! framework and a Redis-like key-value store. For a given `(queue,
//! job_type)` pair, at most one job is ever pending at a time: repeated
//! enqueue requests while a pending job exists collapse into that pending
//! job and return its identifier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      oncejobs dedup scheduler                    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                    │
//! │  Producer                                                         │
//! │     │  Enqueue / EnqueueIn / EnqueueForce / EnqueueForceIn         │
//! │     ▼                                                              │
//! │  ┌────────────────────────────────────────────────────────────┐   │
//! │  │           admission: SET NX/XX CAS loop against             │   │
//! │  │           once:q:<queue>:<job_type>                         │   │
//! │  └───────────────────────────┬────────────────────────────────┘   │
//! │                              │ push Message{jid, x-once}           │
//! │                              ▼                                     │
//! │                     host worker framework                          │
//! │                              │                                     │
//! │                              ▼                                     │
//! │  ┌────────────────────────────────────────────────────────────┐   │
//! │  │   middleware: status script (init-waiting → executing →     │   │
//! │  │   ok | retry-waiting | failed), at-most-once drop           │   │
//! │  └───────────────────────────┬────────────────────────────────┘   │
//! │                              │ PUBLISH on the same key              │
//! │                              ▼                                     │
//! │                  waiter: subscribe → snapshot → select             │
//! │                                                                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use oncejobs::{Admission, KeyBuilder, Options, Waiter};
//! use std::sync::Arc;
//!
//! let store = Arc::new(RedisStore::connect("redis://localhost:6379", 10).await?);
//! let keys = KeyBuilder::new("myapp:");
//! let framework = Arc::new(RedisWorkerFramework::new(pool, keys.clone()));
//! let admission = Admission::new(store.clone(), framework, keys.clone());
//!
//! let jid = admission
//!     .enqueue("emails", "send_welcome", serde_json::json!({"to": "a@example.com"}), Options::default())
//!     .await?;
//!
//! let waiter = Waiter::new(store, keys);
//! let descriptor = waiter.wait_for_job_type("emails", "send_welcome", Default::default(), None).await?;
//! ```

pub mod admission;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod framework;
pub mod keys;
pub mod metrics;
pub mod middleware;
pub mod store;
pub mod waiter;

pub use admission::{Admission, JidGenerator, TimeOrderedJidGenerator};
pub use config::{RedisConfig, SchedulerDefaults};
pub use descriptor::{now_ms, JobDescriptor, Options, Status};
pub use error::{JobError, JobResult};
pub use framework::{Message, RedisWorkerFramework, RetryProbe, WorkerFramework};
pub use keys::KeyBuilder;
pub use metrics::register_metrics;
pub use middleware::Middleware;
pub use store::{KvStore, PubSubStore, RedisStore, Subscription};
pub use waiter::{StopHandle, WaitOptions, Waiter};

/// Re-export of the crate's commonly used traits and types, mirroring
/// `arcana_jobs::prelude`.
pub mod prelude {
    pub use crate::admission::{Admission, JidGenerator};
    pub use crate::descriptor::{JobDescriptor, Options, Status};
    pub use crate::framework::WorkerFramework;
    pub use crate::middleware::Middleware;
    pub use crate::store::{KvStore, PubSubStore};
    pub use crate::waiter::{WaitOptions, Waiter};
    pub use crate::{JobError, JobResult};
}
