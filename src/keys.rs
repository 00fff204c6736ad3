//! Key and channel naming.
//!
//! A single key holds the serialized descriptor for a `(queue, job_type)`
//! pair; the same string names the pub/sub channel carrying its status
//! updates. Mirrors `arcana-jobs::redis::RedisKeys`'s shape, narrowed to the
//! single key the scheduler needs.

/// Builds scheduler keys under a process-wide namespace.
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
    namespace: String,
}

impl KeyBuilder {
    /// Creates a builder with the given namespace prefix (may be empty).
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The descriptor key / pub-sub channel name for `(queue, job_type)`.
    pub fn key(&self, queue: &str, job_type: &str) -> String {
        format!("{}once:q:{}:{}", self.namespace, queue, job_type)
    }

    /// The list key the bundled [`crate::framework::RedisWorkerFramework`]
    /// pushes messages onto for a given queue.
    pub fn queue_list(&self, queue: &str) -> String {
        format!("{}once:queue:{}", self.namespace, queue)
    }

    /// Strips the namespace prefix from `queue` if present; a no-op
    /// otherwise. Matches the original middleware's loose contract — callers
    /// that pass a non-prefixed queue name see it unchanged.
    pub fn strip_namespace<'a>(&self, queue: &'a str) -> &'a str {
        queue.strip_prefix(self.namespace.as_str()).unwrap_or(queue)
    }
}
