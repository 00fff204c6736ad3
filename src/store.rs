//! The key-value store abstraction: connection pool, pub/sub subscriptions,
//! and the atomic status-update script (§4.1). `KvStore`/`PubSubStore` are
//! the seams the rest of the crate programs against; `RedisStore` is the
//! production implementation and `FakeStore` (test-only) backs the suite
//! without a live Redis, the same way `arcana-jobs::retry` tests pure
//! arithmetic instead of going through a connection.

use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The atomic status-transition script (§4.1). Loads the stored descriptor,
/// checks ownership by `jid`, merges the new status/timestamp/result, writes
/// it back with the requested TTL (or deletes it if the TTL is zero), and
/// publishes the result on the channel named by `key` — all in one atomic
/// step on the store.
///
/// Return codes: `0` success, `-1` no descriptor stored, `-2` a different
/// `jid` owns the key.
const UPDATE_STATUS_SCRIPT: &str = r#"
local key = KEYS[1]
local jid = ARGV[1]
local new_status = ARGV[2]
local expire_seconds = tonumber(ARGV[3])
local updated_ms = ARGV[4]
local result = ARGV[5]

local cur = redis.call('GET', key)
if not cur then
  return -1
end

local ok, desc = pcall(cjson.decode, cur)
if not ok then
  return -1
end

if desc.jid ~= jid then
  return -2
end

desc.status = new_status
desc.updated_ms = tonumber(updated_ms)
if result ~= '' then
  desc.result = result
end

local encoded = cjson.encode(desc)

if expire_seconds > 0 then
  redis.call('SET', key, encoded, 'EX', expire_seconds)
else
  redis.call('DEL', key)
end

redis.call('PUBLISH', key, encoded)

return 0
"#;

/// A single subscription to a scheduler channel. Dropping it tears down the
/// background reader task before the underlying connection would otherwise
/// be returned to a pool, per §5's resource-discipline rule.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
    reader: JoinHandle<()>,
}

impl Subscription {
    /// Awaits the next published payload, or `None` once the underlying
    /// subscription has ended.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Commands the store must support for admission and the status script.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `GET key`.
    async fn get(&self, key: &str) -> JobResult<Option<String>>;

    /// `SET key value EX ttl_secs NX` — set only if absent.
    async fn set_nx(&self, key: &str, value: &str, ttl_secs: i64) -> JobResult<bool>;

    /// `SET key value EX ttl_secs XX` — set only if already present.
    async fn set_xx(&self, key: &str, value: &str, ttl_secs: i64) -> JobResult<bool>;

    /// `SET key value EX ttl_secs` unconditionally (the force path).
    async fn set_force(&self, key: &str, value: &str, ttl_secs: i64) -> JobResult<()>;

    /// Runs the atomic status script; see [`UPDATE_STATUS_SCRIPT`].
    async fn update_status(
        &self,
        key: &str,
        jid: &str,
        new_status: &str,
        expire_seconds: i64,
        updated_ms: i64,
        result: Option<&str>,
    ) -> JobResult<i64>;
}

/// Pub/sub access, kept separate from [`KvStore`] because a subscription
/// holds its connection in a distinct state and cannot be multiplexed with
/// ordinary commands (§5).
#[async_trait]
pub trait PubSubStore: Send + Sync {
    async fn subscribe(&self, channel: &str) -> JobResult<Subscription>;
}

/// Redis-backed store: a pooled connection for commands, and a dedicated
/// client for pub/sub connections (subscriptions cannot come from the pool).
pub struct RedisStore {
    pool: Pool,
    client: redis::Client,
    script: redis::Script,
}

impl RedisStore {
    /// Builds a pool and a dedicated pub/sub client from `url`, pinging the
    /// pool once to fail fast on misconfiguration.
    pub async fn connect(url: &str, pool_size: usize) -> JobResult<Self> {
        let mut cfg = PoolConfig::from_url(url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| JobError::Framework(e.to_string()))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(pool_size, "redis store connected");

        let client = redis::Client::open(url)?;

        Ok(Self {
            pool,
            client,
            script: redis::Script::new(UPDATE_STATUS_SCRIPT),
        })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> JobResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_secs: i64) -> JobResult<bool> {
        let mut conn = self.pool.get().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn set_xx(&self, key: &str, value: &str, ttl_secs: i64) -> JobResult<bool> {
        let mut conn = self.pool.get().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn set_force(&self, key: &str, value: &str, ttl_secs: i64) -> JobResult<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.set_ex(key, value, ttl_secs.max(0) as u64).await?;
        Ok(())
    }

    async fn update_status(
        &self,
        key: &str,
        jid: &str,
        new_status: &str,
        expire_seconds: i64,
        updated_ms: i64,
        result: Option<&str>,
    ) -> JobResult<i64> {
        let mut conn = self.pool.get().await?;
        let code: i64 = self
            .script
            .key(key)
            .arg(jid)
            .arg(new_status)
            .arg(expire_seconds)
            .arg(updated_ms)
            .arg(result.unwrap_or(""))
            .invoke_async(&mut conn)
            .await?;
        debug!(key, new_status, code, "status script");
        Ok(code)
    }
}

#[async_trait]
impl PubSubStore for RedisStore {
    async fn subscribe(&self, channel: &str) -> JobResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(32);
        let channel_owned = channel.to_string();
        let reader = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %channel_owned, error = %e, "malformed pub/sub payload");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription { rx, reader })
    }
}

#[cfg(test)]
pub mod fake {
    //! An in-memory `KvStore`/`PubSubStore` used by the rest of the crate's
    //! test suites so the CAS loop, the script's merge logic, and the
    //! waiter's protocol can be exercised without a live Redis.
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    #[derive(Clone)]
    struct Entry {
        value: String,
    }

    /// An in-memory store. TTLs are accepted but not enforced — tests that
    /// care about expiry exercise the TTL arithmetic directly against
    /// `descriptor`/`config` instead of waiting on this fake.
    pub struct FakeStore {
        entries: Mutex<HashMap<String, Entry>>,
        channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    }

    impl FakeStore {
        pub fn new() -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
            }
        }

        fn publish(&self, key: &str, payload: String) {
            let channels = self.channels.lock();
            if let Some(tx) = channels.get(key) {
                let _ = tx.send(payload);
            }
        }

        fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
            let mut channels = self.channels.lock();
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(32).0)
                .clone()
        }

        /// Drops the channel's sender, simulating a closed pub/sub stream
        /// (e.g. a dropped Redis connection). Existing `Subscription`s see
        /// their reader task exit and `next()` resolve to `None`.
        pub fn close_channel(&self, channel: &str) {
            self.channels.lock().remove(channel);
        }
    }

    impl Default for FakeStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl KvStore for FakeStore {
        async fn get(&self, key: &str) -> JobResult<Option<String>> {
            Ok(self.entries.lock().get(key).map(|e| e.value.clone()))
        }

        async fn set_nx(&self, key: &str, value: &str, _ttl_secs: i64) -> JobResult<bool> {
            let mut entries = self.entries.lock();
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                },
            );
            Ok(true)
        }

        async fn set_xx(&self, key: &str, value: &str, _ttl_secs: i64) -> JobResult<bool> {
            let mut entries = self.entries.lock();
            if !entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                },
            );
            Ok(true)
        }

        async fn set_force(&self, key: &str, value: &str, _ttl_secs: i64) -> JobResult<()> {
            self.entries.lock().insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                },
            );
            Ok(())
        }

        async fn update_status(
            &self,
            key: &str,
            jid: &str,
            new_status: &str,
            expire_seconds: i64,
            updated_ms: i64,
            result: Option<&str>,
        ) -> JobResult<i64> {
            let raw = {
                let entries = self.entries.lock();
                match entries.get(key) {
                    Some(e) => e.value.clone(),
                    None => return Ok(-1),
                }
            };

            let mut value: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(_) => return Ok(-1),
            };

            let stored_jid = value.get("jid").and_then(|v| v.as_str()).unwrap_or("");
            if stored_jid != jid {
                return Ok(-2);
            }

            value["status"] = serde_json::Value::String(new_status.to_string());
            value["updated_ms"] = serde_json::Value::from(updated_ms);
            if let Some(r) = result {
                value["result"] = serde_json::Value::String(r.to_string());
            }

            let encoded = value.to_string();

            {
                let mut entries = self.entries.lock();
                if expire_seconds > 0 {
                    entries.insert(
                        key.to_string(),
                        Entry {
                            value: encoded.clone(),
                        },
                    );
                } else {
                    entries.remove(key);
                }
            }

            self.publish(key, encoded);
            Ok(0)
        }
    }

    #[async_trait]
    impl PubSubStore for FakeStore {
        async fn subscribe(&self, channel: &str) -> JobResult<Subscription> {
            let sender = self.sender_for(channel);
            let mut broadcast_rx = sender.subscribe();
            let (tx, rx) = mpsc::channel(32);
            let reader = tokio::spawn(async move {
                loop {
                    match broadcast_rx.recv().await {
                        Ok(payload) => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(Subscription { rx, reader })
        }
    }

    pub type SharedFakeStore = Arc<FakeStore>;
}
