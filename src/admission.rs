//! Enqueue admission control (§4.3): the CAS-style protocol that decides
//! whether a submission becomes the pending job for a `(queue, job_type)` or
//! is absorbed by an already-pending one, plus the unconditional force path.

use crate::descriptor::{now_ms, JobDescriptor, Options};
use crate::error::JobResult;
use crate::framework::{Message, WorkerFramework};
use crate::keys::KeyBuilder;
use crate::metrics;
use crate::store::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Supplies time-ordered unique job identifiers. The scheduler itself is
/// agnostic to how these are minted — spec.md lists identifier generation as
/// an external collaborator's responsibility — but a crate that can't run on
/// its own isn't much of a teaching example, so a UUIDv7-backed default is
/// provided.
pub trait JidGenerator: Send + Sync {
    fn next_jid(&self) -> String;
}

/// Generates identifiers via UUIDv7, which — like the original's
/// `gocql.TimeUUID()` — sorts lexicographically in creation order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeOrderedJidGenerator;

impl JidGenerator for TimeOrderedJidGenerator {
    fn next_jid(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

/// Which submission ended up owning the key.
enum Ownership {
    /// This submission's descriptor was written; `jid` is its own.
    Owned(String),
    /// An existing `init-waiting` descriptor was adopted; `jid` is its.
    Absorbed(String),
}

/// Enqueues jobs through the dedup admission protocol against a store `S`
/// and a host worker framework `F`.
pub struct Admission<S, F, J = TimeOrderedJidGenerator> {
    store: Arc<S>,
    framework: Arc<F>,
    keys: KeyBuilder,
    jid_gen: J,
}

impl<S, F> Admission<S, F, TimeOrderedJidGenerator> {
    /// Builds an admission layer using the default time-ordered jid generator.
    pub fn new(store: Arc<S>, framework: Arc<F>, keys: KeyBuilder) -> Self {
        Self {
            store,
            framework,
            keys,
            jid_gen: TimeOrderedJidGenerator,
        }
    }
}

impl<S, F, J> Admission<S, F, J>
where
    S: KvStore,
    F: WorkerFramework,
    J: JidGenerator,
{
    /// Builds an admission layer with a caller-supplied jid generator.
    pub fn with_jid_generator(store: Arc<S>, framework: Arc<F>, keys: KeyBuilder, jid_gen: J) -> Self {
        Self {
            store,
            framework,
            keys,
            jid_gen,
        }
    }

    /// `Enqueue(queue, job_type, args, options)`: returns this submission's
    /// jid, or the jid of the `init-waiting` descriptor it was absorbed by.
    pub async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        args: serde_json::Value,
        options: Options,
    ) -> JobResult<String> {
        self.enqueue_inner(queue, job_type, args, options, false).await
    }

    /// `EnqueueIn`: identical to [`Self::enqueue`] but sets the forwarded
    /// `at` enqueue-option to `now + delay`, matching how
    /// `original_source/enqueue.go` forwards `EnqueueOptions.At` verbatim.
    pub async fn enqueue_in(
        &self,
        queue: &str,
        job_type: &str,
        delay: Duration,
        args: serde_json::Value,
        mut options: Options,
    ) -> JobResult<String> {
        set_forwarded_at(&mut options, delay);
        self.enqueue_inner(queue, job_type, args, options, false).await
    }

    /// `EnqueueForce`: unconditionally replaces whatever descriptor is
    /// stored, if any.
    pub async fn enqueue_force(
        &self,
        queue: &str,
        job_type: &str,
        args: serde_json::Value,
        options: Options,
    ) -> JobResult<String> {
        self.enqueue_inner(queue, job_type, args, options, true).await
    }

    /// `EnqueueForceIn`: the delayed variant of [`Self::enqueue_force`].
    pub async fn enqueue_force_in(
        &self,
        queue: &str,
        job_type: &str,
        delay: Duration,
        args: serde_json::Value,
        mut options: Options,
    ) -> JobResult<String> {
        set_forwarded_at(&mut options, delay);
        self.enqueue_inner(queue, job_type, args, options, true).await
    }

    async fn enqueue_inner(
        &self,
        queue: &str,
        job_type: &str,
        args: serde_json::Value,
        options: Options,
        force: bool,
    ) -> JobResult<String> {
        let jid = self.jid_gen.next_jid();
        let key = self.keys.key(queue, job_type);
        let descriptor = JobDescriptor::new(&jid, queue, job_type, options);
        let init_wait = descriptor
            .options
            .as_ref()
            .map(|o| o.init_wait)
            .unwrap_or_default();
        let serialized = descriptor.to_json()?;

        let ownership = if force {
            self.store.set_force(&key, &serialized, init_wait).await?;
            metrics::enqueue_forced();
            Ownership::Owned(jid.clone())
        } else {
            self.cas_loop(&key, &jid, &serialized, init_wait).await?
        };

        let owning_jid = match &ownership {
            Ownership::Owned(j) => j.clone(),
            Ownership::Absorbed(j) => {
                metrics::enqueue_absorbed();
                debug!(queue, job_type, absorbed_jid = %j, "enqueue absorbed by pending job");
                return Ok(j.clone());
            }
        };

        let message = Message {
            jid: owning_jid.clone(),
            queue: queue.to_string(),
            args,
            retry_count: None,
            x_once: Some(descriptor),
        };

        if let Err(e) = self.framework.enqueue(message).await {
            warn!(queue, job_type, error = %e, "enqueue-framework failed, rolling back descriptor");
            metrics::enqueue_rollback();
            let _ = self
                .store
                .update_status(&key, &jid, "", 0, now_ms(), None)
                .await;
            return Err(e);
        }

        metrics::enqueued();
        Ok(owning_jid)
    }

    /// The CAS loop from §4.3: adopt an `init-waiting` descriptor if one is
    /// pending, otherwise race to take ownership of the key via `SET
    /// NX`/`SET XX`, retrying on the rare race with a concurrent submission.
    async fn cas_loop(
        &self,
        key: &str,
        jid: &str,
        serialized: &str,
        init_wait: i64,
    ) -> JobResult<Ownership> {
        loop {
            match self.store.get(key).await? {
                Some(cur) => match JobDescriptor::from_json(&cur) {
                    Ok(existing) if existing.is_init_waiting() => {
                        return Ok(Ownership::Absorbed(existing.jid));
                    }
                    Ok(_) | Err(_) => {
                        // Stale, terminal, or malformed — take ownership
                        // without racing a delete (§9 open question: a
                        // malformed value is treated as non-init-waiting and
                        // silently overwritten).
                        if self.store.set_xx(key, serialized, init_wait).await? {
                            return Ok(Ownership::Owned(jid.to_string()));
                        }
                        continue;
                    }
                },
                None => {
                    if self.store.set_nx(key, serialized, init_wait).await? {
                        return Ok(Ownership::Owned(jid.to_string()));
                    }
                    continue;
                }
            }
        }
    }
}

fn set_forwarded_at(options: &mut Options, delay: Duration) {
    let at = (chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
        .timestamp_millis() as f64
        / 1000.0;
    options
        .extra
        .insert("at".to_string(), serde_json::json!(at));
}
