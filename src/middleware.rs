//! Execution middleware (§4.4): wraps the worker framework's per-message
//! callback, drives the status machine, and implements the at-most-once
//! drop rule.

use crate::descriptor::{now_ms, Options, Status};
use crate::error::JobResult;
use crate::framework::{Message, RetryProbe};
use crate::keys::KeyBuilder;
use crate::metrics;
use crate::store::KvStore;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wraps job execution for messages produced by the admission protocol.
pub struct Middleware<S, P> {
    store: Arc<S>,
    keys: KeyBuilder,
    probe: Arc<P>,
}

impl<S, P> Middleware<S, P>
where
    S: KvStore,
    P: RetryProbe,
{
    pub fn new(store: Arc<S>, keys: KeyBuilder, probe: Arc<P>) -> Self {
        Self { store, keys, probe }
    }

    /// Runs `callback` under the dedup status machine. `callback` stands in
    /// for the worker framework's own middleware chain: `Ok(ack)` is a
    /// normal return, `Err(_)` models the original's panic/exception path.
    ///
    /// Returns the acknowledgement the framework should use, or propagates
    /// `callback`'s error after recording the appropriate terminal status —
    /// the middleware never suppresses a failure, only annotates it.
    pub async fn call(
        &self,
        queue: &str,
        message: &Message,
        callback: impl FnOnce() -> BoxFuture<'static, JobResult<bool>>,
    ) -> JobResult<bool> {
        let Some(x_once) = message.x_once.as_ref() else {
            // No `x-once` field: this job was not enqueued through this
            // subsystem. Invoke the callback and do nothing else — not even
            // a read (§8 S-series "no x-once" behavior).
            return callback().await;
        };

        let options = match x_once.options.clone() {
            Some(options) => options,
            None => {
                warn!(jid = %message.jid, "x-once carried no options record, proceeding with merged defaults");
                Options::default().with_defaults()
            }
        };
        let stripped_queue = self.keys.strip_namespace(queue);
        let key = self.keys.key(stripped_queue, &x_once.job_type);

        // §4.4 step 3: the pre-call counter comes from the message envelope
        // itself, not a fresh probe query — it is the attempt number the job
        // was dequeued with.
        let pre_retry_count = message.retry_count.unwrap_or(-1);

        let result = self
            .store
            .update_status(&key, &message.jid, Status::Executing.as_str(), options.exec_wait, now_ms(), None)
            .await?;
        metrics::status_transition(Status::Executing.as_str());
        debug!(key, result, "middleware entered executing");

        if options.at_most_once && result < 0 {
            metrics::at_most_once_dropped();
            warn!(key, result, "at-most-once drop: descriptor gone or superseded");
            return Ok(true);
        }

        match callback().await {
            Ok(ack) => {
                self.store
                    .update_status(&key, &message.jid, Status::Ok.as_str(), options.success_retention, now_ms(), None)
                    .await?;
                metrics::status_transition(Status::Ok.as_str());
                Ok(ack)
            }
            Err(e) => {
                // §4.4 step 7: "read the retry counter again" — this is a
                // live query against the framework, since the envelope's own
                // `retry_count` field is a snapshot from dequeue time and
                // will not reflect a bump the retry middleware applied while
                // handling this failure.
                let post_retry_count = self.probe.retry_count(&message.jid).await;
                let retried = matches!(post_retry_count, Some(after) if after > pre_retry_count);

                let (status, ttl) = if retried {
                    (Status::RetryWaiting, options.retry_wait)
                } else {
                    (Status::Failed, options.failure_retention)
                };

                self.store
                    .update_status(&key, &message.jid, status.as_str(), ttl, now_ms(), None)
                    .await?;
                metrics::status_transition(status.as_str());
                Err(e)
            }
        }
    }
}
