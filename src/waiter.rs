//! The completion waiter (§4.5): observes a `(queue, job_type)` key until its
//! descriptor reaches a terminal status, or fails with one of
//! `no-matching-jobs` / `aborted` / `timeout`.
//!
//! The one design decision that makes this correct is ordering: the
//! subscription must be acknowledged *before* the snapshot `GET` runs, or a
//! transition landing between the two would be missed entirely.

use crate::descriptor::JobDescriptor;
use crate::error::{JobError, JobResult};
use crate::keys::KeyBuilder;
use crate::metrics;
use crate::store::PubSubStore;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Options accepted by [`Waiter::wait_for_job_type`].
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Return `no-matching-jobs` immediately if no descriptor is stored,
    /// instead of blocking until timeout.
    pub stop_if_empty: bool,
    /// Wall-clock deadline for the wait. A supplied zero is normalized to
    /// [`crate::config::SchedulerDefaults::WAIT_TIMEOUT_SECS`].
    pub timeout: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            stop_if_empty: false,
            timeout: Duration::from_secs(crate::config::SchedulerDefaults::WAIT_TIMEOUT_SECS),
        }
    }
}

impl WaitOptions {
    /// Applies the zero-timeout-means-default rule.
    fn normalized(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(crate::config::SchedulerDefaults::WAIT_TIMEOUT_SECS);
        }
        self
    }
}

/// A handle that cancels an in-flight [`Waiter::wait_for_job_type`] call.
/// Dropping it without calling [`Self::stop`] has no effect — the wait
/// simply runs until timeout or completion.
pub struct StopHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl StopHandle {
    /// Requests that the associated wait return the `aborted` error. A
    /// second call, or a call after the wait already finished, is a no-op.
    pub fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Observes status transitions for `(queue, job_type)` keys against a store
/// `S`, using a dedicated pub/sub connection per call (§5: subscriptions
/// cannot be multiplexed with ordinary commands).
pub struct Waiter<S> {
    store: std::sync::Arc<S>,
    keys: KeyBuilder,
}

impl<S> Waiter<S>
where
    S: crate::store::KvStore + PubSubStore,
{
    pub fn new(store: std::sync::Arc<S>, keys: KeyBuilder) -> Self {
        Self { store, keys }
    }

    /// The non-blocking sibling of [`Self::wait_for_job_type`]: returns the
    /// current descriptor, or [`JobError::NoMatchingJobs`] if the key is
    /// absent.
    pub async fn get_desc(&self, queue: &str, job_type: &str) -> JobResult<JobDescriptor> {
        let key = self.keys.key(queue, job_type);
        match self.store.get(&key).await? {
            Some(raw) => JobDescriptor::from_json(&raw),
            None => Err(JobError::NoMatchingJobs),
        }
    }

    /// Returns a [`StopHandle`] paired with a future that, once awaited
    /// alongside [`Self::wait_for_job_type`], cancels it. Most callers use
    /// [`Self::wait_for_job_type`] directly and ignore cancellation; this is
    /// exposed for hosts that need to cancel a wait from another task.
    pub fn stop_handle() -> (StopHandle, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (StopHandle { tx: Some(tx) }, rx)
    }

    /// `WaitForJobType(queue, job_type, options)` (§4.5). `abort` is the
    /// receiving half of a [`Self::stop_handle`] pair, or `None` if the
    /// caller never wants to cancel the wait early.
    pub async fn wait_for_job_type(
        &self,
        queue: &str,
        job_type: &str,
        options: WaitOptions,
        abort: Option<oneshot::Receiver<()>>,
    ) -> JobResult<JobDescriptor> {
        let options = options.normalized();
        let key = self.keys.key(queue, job_type);

        // Subscribe first — the snapshot read below must happen only after
        // the subscription is live, or a transition landing in between would
        // be lost forever (§4.5 "Race fix").
        let mut subscription = self.store.subscribe(&key).await?;

        if let Some(descriptor) = self.snapshot(&key, &options).await? {
            metrics::wait_completed();
            return Ok(descriptor);
        }

        let sleep = tokio::time::sleep(options.timeout);
        tokio::pin!(sleep);
        let mut abort = abort;
        // Once the subscription stream closes, `subscription.next()` would
        // resolve to `None` immediately on every subsequent poll. With a
        // `biased` select that starves the timeout arm forever, so stop
        // selecting on it and fall back to waiting on `sleep`/`abort` alone.
        let mut subscription_closed = false;

        loop {
            tokio::select! {
                biased;

                _ = async {
                    match abort.as_mut() {
                        Some(rx) => { let _ = rx.await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    metrics::wait_aborted();
                    return Err(JobError::Aborted);
                }

                payload = subscription.next(), if !subscription_closed => {
                    match payload {
                        Some(raw) => {
                            let descriptor = match JobDescriptor::from_json(&raw) {
                                Ok(d) => d,
                                Err(e) => {
                                    warn!(key, error = %e, "malformed pub/sub payload, ignoring");
                                    continue;
                                }
                            };
                            if descriptor.is_done() {
                                metrics::wait_completed();
                                return Ok(descriptor);
                            }
                        }
                        None => {
                            // Subscription stream closed. Only stop_if_empty
                            // turns this into no-matching-jobs; otherwise
                            // keep waiting for the timeout (§7).
                            if options.stop_if_empty {
                                return Err(JobError::NoMatchingJobs);
                            }
                            warn!(key, "subscription ended before a terminal status was observed, waiting for timeout");
                            subscription_closed = true;
                        }
                    }
                }

                () = &mut sleep => {
                    metrics::wait_timed_out();
                    return Err(JobError::Timeout);
                }
            }
        }
    }

    /// The one-shot snapshot read performed immediately after subscribing:
    /// `no-matching-jobs` if absent and `stop_if_empty`, the descriptor
    /// itself if already terminal, or `None` to fall through to the select
    /// loop.
    async fn snapshot(&self, key: &str, options: &WaitOptions) -> JobResult<Option<JobDescriptor>> {
        match self.store.get(key).await? {
            None if options.stop_if_empty => Err(JobError::NoMatchingJobs),
            None => Ok(None),
            Some(raw) => match JobDescriptor::from_json(&raw) {
                Ok(d) if d.is_done() => {
                    debug!(key, "snapshot already terminal");
                    Ok(Some(d))
                }
                Ok(_) | Err(_) => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Options;
    use crate::store::fake::FakeStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn waiter() -> (Waiter<FakeStore>, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::new());
        (Waiter::new(store.clone(), KeyBuilder::new("")), store)
    }

    #[tokio::test]
    async fn s8_stop_if_empty_returns_no_matching_jobs_immediately() {
        let (waiter, _store) = waiter();
        let err = waiter
            .wait_for_job_type(
                "q",
                "t",
                WaitOptions {
                    stop_if_empty: true,
                    timeout: Duration::from_secs(30),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NoMatchingJobs));
    }

    #[tokio::test]
    async fn s8_without_stop_if_empty_blocks_until_timeout() {
        let (waiter, _store) = waiter();
        let err = waiter
            .wait_for_job_type(
                "q",
                "t",
                WaitOptions {
                    stop_if_empty: false,
                    timeout: Duration::from_millis(20),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Timeout));
    }

    #[tokio::test]
    async fn closed_subscription_without_stop_if_empty_still_reaches_timeout() {
        let (waiter, store) = waiter();
        let key = waiter.keys.key("q", "t");

        // Close the channel shortly after the wait subscribes, simulating a
        // dropped pub/sub connection. Without the fix this starves the
        // `sleep` arm forever since a closed `mpsc::Receiver` is immediately
        // ready with `None` on every poll.
        let store2 = store.clone();
        let key2 = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            store2.close_channel(&key2);
        });

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            waiter.wait_for_job_type(
                "q",
                "t",
                WaitOptions {
                    stop_if_empty: false,
                    timeout: Duration::from_millis(50),
                },
                None,
            ),
        )
        .await;

        let err = result
            .expect("wait must return once its deadline elapses, not hang")
            .unwrap_err();
        assert!(matches!(err, JobError::Timeout));
    }

    #[tokio::test]
    async fn returns_immediately_when_snapshot_is_already_terminal() {
        let (waiter, store) = waiter();
        let key = waiter.keys.key("q", "t");
        store
            .set_nx(&key, r#"{"jid":"1","status":"ok","queue":"q","job_type":"t","created_ms":0,"updated_ms":0}"#, 30)
            .await
            .unwrap();

        let descriptor = waiter
            .wait_for_job_type("q", "t", WaitOptions::default(), None)
            .await
            .unwrap();
        assert!(descriptor.is_ok());
    }

    #[tokio::test]
    async fn s7_wakes_on_published_terminal_transition() {
        let (waiter, store) = waiter();
        let key = waiter.keys.key("q", "t");
        store
            .set_nx(&key, r#"{"jid":"1","status":"retry-waiting","queue":"q","job_type":"t","created_ms":0,"updated_ms":0}"#, 30)
            .await
            .unwrap();

        let store2 = store.clone();
        let publisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            store2
                .update_status(&"once:q:q:t".to_string(), "1", "ok", 5, 1, None)
                .await
                .unwrap();
        });

        let started = std::time::Instant::now();
        let descriptor = waiter
            .wait_for_job_type(
                "q",
                "t",
                WaitOptions {
                    stop_if_empty: false,
                    timeout: Duration::from_secs(5),
                },
                None,
            )
            .await
            .unwrap();
        publisher.await.unwrap();

        assert!(descriptor.is_done());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn non_terminal_publish_is_ignored_and_wait_continues() {
        let (waiter, store) = waiter();
        let key = waiter.keys.key("q", "t");
        store
            .set_nx(&key, r#"{"jid":"1","status":"init-waiting","queue":"q","job_type":"t","created_ms":0,"updated_ms":0}"#, 30)
            .await
            .unwrap();

        let store2 = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            store2
                .update_status("once:q:q:t", "1", "executing", 90, 1, None)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            store2
                .update_status("once:q:q:t", "1", "ok", 5, 2, None)
                .await
                .unwrap();
        });

        let descriptor = waiter
            .wait_for_job_type(
                "q",
                "t",
                WaitOptions {
                    stop_if_empty: false,
                    timeout: Duration::from_secs(5),
                },
                None,
            )
            .await
            .unwrap();
        assert!(descriptor.is_ok());
    }

    #[tokio::test]
    async fn stop_handle_aborts_an_in_flight_wait() {
        let (waiter, _store) = waiter();
        let (mut stop, rx) = Waiter::<FakeStore>::stop_handle();

        let wait = tokio::spawn(async move {
            waiter
                .wait_for_job_type(
                    "q",
                    "t",
                    WaitOptions {
                        stop_if_empty: false,
                        timeout: Duration::from_secs(30),
                    },
                    Some(rx),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.stop();
        let err = wait.await.unwrap().unwrap_err();
        assert!(matches!(err, JobError::Aborted));
    }

    #[tokio::test]
    async fn get_desc_returns_current_descriptor_or_no_matching_jobs() {
        let (waiter, store) = waiter();
        let err = waiter.get_desc("q", "t").await.unwrap_err();
        assert!(matches!(err, JobError::NoMatchingJobs));

        let key = waiter.keys.key("q", "t");
        store
            .set_nx(&key, &JobDescriptor::new("1", "q", "t", Options::default()).to_json().unwrap(), 30)
            .await
            .unwrap();
        let descriptor = waiter.get_desc("q", "t").await.unwrap();
        assert_eq!(descriptor.jid, "1");
    }
}
