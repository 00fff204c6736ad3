//! Connection and scheduler-default configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Process-wide key namespace prefixed onto every scheduler key, e.g.
    /// `myapp:`, producing keys shaped `myapp:once:q:<queue>:<job_type>`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            namespace: default_namespace(),
        }
    }
}

impl RedisConfig {
    /// Returns the connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_namespace() -> String {
    String::new()
}

/// Compiled-in TTL defaults applied when a descriptor's options carry the
/// zero value for the corresponding field (see `descriptor::Options`).
/// These are not user configuration — they mirror `optionsMergeDefaults` in
/// the originating Go package — but are documented here alongside
/// [`RedisConfig`] the same way the ambient worker stack documents queue and
/// retry defaults next to its Redis configuration.
pub struct SchedulerDefaults;

impl SchedulerDefaults {
    /// TTL, in seconds, applied while a descriptor is `init-waiting`.
    pub const INIT_WAIT_SECS: i64 = 30;
    /// TTL, in seconds, applied on entry to `retry-waiting`.
    pub const RETRY_WAIT_SECS: i64 = 60;
    /// TTL, in seconds, applied while `executing` — also the execution watchdog.
    pub const EXEC_WAIT_SECS: i64 = 90;
    /// TTL, in seconds, applied on `ok`.
    pub const SUCCESS_RETENTION_SECS: i64 = 5;
    /// TTL, in seconds, applied on `failed`.
    pub const FAILURE_RETENTION_SECS: i64 = 5;
    /// Default waiter timeout when none is supplied (or a zero is supplied).
    pub const WAIT_TIMEOUT_SECS: u64 = 3600;
}
