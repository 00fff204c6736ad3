//! The job descriptor: the authoritative record of a scheduled job, and the
//! options that control its TTLs and drop semantics.

use crate::config::SchedulerDefaults;
use crate::error::{JobError, JobResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Life-cycle state of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Created by admission; no worker has picked up the message yet.
    InitWaiting,
    /// The middleware has entered the callback.
    Executing,
    /// The callback failed and the framework's retry middleware rescheduled it.
    RetryWaiting,
    /// The callback returned successfully.
    Ok,
    /// The callback failed terminally.
    Failed,
}

impl Status {
    /// The exact wire literal for this status, per §6 of the scheduler's
    /// external interface.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::InitWaiting => "init-waiting",
            Status::Executing => "executing",
            Status::RetryWaiting => "retry-waiting",
            Status::Ok => "ok",
            Status::Failed => "failed",
        }
    }
}

/// Policy knobs attached to a descriptor.
///
/// TTL fields are expressed in seconds. A stored `0` is replaced with the
/// compiled-in default at *construction* time only (`Options::with_defaults`);
/// a negative value is an explicit override and is retained verbatim.
/// Unrecognized keys — including the forwarded enqueue-options the worker
/// framework cares about (`retry`, `retry_count`, `at`, …) — round-trip
/// through `extra` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Drop the job instead of running it once ownership of the key has lapsed.
    #[serde(default)]
    pub at_most_once: bool,
    /// Allow admission to overwrite a non-`init-waiting` descriptor.
    #[serde(default)]
    pub override_started: bool,
    /// TTL while `init-waiting`.
    #[serde(default)]
    pub init_wait: i64,
    /// TTL on entry to `retry-waiting`.
    #[serde(default)]
    pub retry_wait: i64,
    /// TTL while `executing`.
    #[serde(default)]
    pub exec_wait: i64,
    /// TTL on `ok`.
    #[serde(default)]
    pub success_retention: i64,
    /// TTL on `failed`.
    #[serde(default)]
    pub failure_retention: i64,
    /// Forwarded enqueue-options and any other caller-supplied fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            at_most_once: false,
            override_started: false,
            init_wait: 0,
            retry_wait: 0,
            exec_wait: 0,
            success_retention: 0,
            failure_retention: 0,
            extra: serde_json::Map::new(),
        }
    }
}

impl Options {
    /// Replaces every zero-valued TTL field with its compiled-in default.
    /// Negative values are left untouched (an explicit override).
    pub fn with_defaults(mut self) -> Self {
        if self.init_wait == 0 {
            self.init_wait = SchedulerDefaults::INIT_WAIT_SECS;
        }
        if self.retry_wait == 0 {
            self.retry_wait = SchedulerDefaults::RETRY_WAIT_SECS;
        }
        if self.exec_wait == 0 {
            self.exec_wait = SchedulerDefaults::EXEC_WAIT_SECS;
        }
        if self.success_retention == 0 {
            self.success_retention = SchedulerDefaults::SUCCESS_RETENTION_SECS;
        }
        if self.failure_retention == 0 {
            self.failure_retention = SchedulerDefaults::FAILURE_RETENTION_SECS;
        }
        self
    }
}

/// The authoritative, serialized record of a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub jid: String,
    pub status: Status,
    pub queue: String,
    pub job_type: String,
    pub created_ms: i64,
    pub updated_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl JobDescriptor {
    /// Constructs a fresh descriptor in `init-waiting`, applying the
    /// options' TTL defaults and stamping `created_ms == updated_ms == now`.
    pub fn new(jid: impl Into<String>, queue: impl Into<String>, job_type: impl Into<String>, options: Options) -> Self {
        let now = now_ms();
        Self {
            jid: jid.into(),
            status: Status::InitWaiting,
            queue: queue.into(),
            job_type: job_type.into(),
            created_ms: now,
            updated_ms: now,
            options: Some(options.with_defaults()),
            result: None,
        }
    }

    /// Parses a descriptor from its canonical JSON encoding. Unknown fields
    /// are tolerated (structural parse, not a closed record).
    pub fn from_json(raw: &str) -> JobResult<Self> {
        serde_json::from_str(raw).map_err(JobError::Serialization)
    }

    /// Serializes the descriptor to its canonical JSON encoding.
    pub fn to_json(&self) -> JobResult<String> {
        serde_json::to_string(self).map_err(JobError::Serialization)
    }

    pub fn is_init_waiting(&self) -> bool {
        self.status == Status::InitWaiting
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status, Status::Ok | Status::Failed)
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// True iff `options.override_started` is set and the descriptor is no
    /// longer `init-waiting` — the condition under which admission is
    /// permitted to replace a currently-owned descriptor outright.
    pub fn can_be_overridden(&self) -> bool {
        let overridable = self
            .options
            .as_ref()
            .map(|o| o.override_started)
            .unwrap_or(false);
        overridable && !self.is_init_waiting()
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
