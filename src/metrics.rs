//! Prometheus-style metrics for the deduplicating scheduler, following
//! `arcana-jobs::metrics`'s `describe_*!`/`counter!`/`gauge!` pattern.

use metrics::{counter, describe_counter};

/// Metric names for the scheduler.
pub mod names {
    pub const ENQUEUED_TOTAL: &str = "oncejobs_enqueued_total";
    pub const ABSORBED_TOTAL: &str = "oncejobs_absorbed_total";
    pub const FORCED_TOTAL: &str = "oncejobs_forced_total";
    pub const ROLLBACK_TOTAL: &str = "oncejobs_rollback_total";
    pub const STATUS_TRANSITIONS_TOTAL: &str = "oncejobs_status_transitions_total";
    pub const AT_MOST_ONCE_DROPPED_TOTAL: &str = "oncejobs_at_most_once_dropped_total";
    pub const WAIT_TOTAL: &str = "oncejobs_wait_total";
    pub const WAIT_TIMEOUT_TOTAL: &str = "oncejobs_wait_timeout_total";
    pub const WAIT_ABORTED_TOTAL: &str = "oncejobs_wait_aborted_total";
}

/// Registers metric descriptions with whatever exporter the host process
/// has installed. Call once at process start.
pub fn register_metrics() {
    describe_counter!(names::ENQUEUED_TOTAL, "Total submissions accepted as the owning job");
    describe_counter!(names::ABSORBED_TOTAL, "Total submissions collapsed into an existing pending job");
    describe_counter!(names::FORCED_TOTAL, "Total EnqueueForce/EnqueueForceIn calls");
    describe_counter!(names::ROLLBACK_TOTAL, "Total descriptor rollbacks after a framework enqueue failure");
    describe_counter!(names::STATUS_TRANSITIONS_TOTAL, "Total status-script transitions, labeled by status");
    describe_counter!(names::AT_MOST_ONCE_DROPPED_TOTAL, "Total at-most-once deliveries dropped by the middleware");
    describe_counter!(names::WAIT_TOTAL, "Total WaitForJobType calls that observed a terminal descriptor");
    describe_counter!(names::WAIT_TIMEOUT_TOTAL, "Total WaitForJobType calls that timed out");
    describe_counter!(names::WAIT_ABORTED_TOTAL, "Total WaitForJobType calls cancelled via Stop()");
}

pub fn enqueued() {
    counter!(names::ENQUEUED_TOTAL).increment(1);
}

pub fn enqueue_absorbed() {
    counter!(names::ABSORBED_TOTAL).increment(1);
}

pub fn enqueue_forced() {
    counter!(names::FORCED_TOTAL).increment(1);
}

pub fn enqueue_rollback() {
    counter!(names::ROLLBACK_TOTAL).increment(1);
}

pub fn status_transition(status: &'static str) {
    counter!(names::STATUS_TRANSITIONS_TOTAL, "status" => status).increment(1);
}

pub fn at_most_once_dropped() {
    counter!(names::AT_MOST_ONCE_DROPPED_TOTAL).increment(1);
}

pub fn wait_completed() {
    counter!(names::WAIT_TOTAL).increment(1);
}

pub fn wait_timed_out() {
    counter!(names::WAIT_TIMEOUT_TOTAL).increment(1);
}

pub fn wait_aborted() {
    counter!(names::WAIT_ABORTED_TOTAL).increment(1);
}
