//! Configuration for the history store and replication pipeline

use std::time::Duration;

/// Tunables for the replication task runtime.
///
/// Defaults match the production deployment; tests override individual
/// fields to force specific paths (e.g. a zero buffer-retry count to reach
/// the re-replication fallback immediately).
#[derive(Clone, Debug)]
pub struct ReplicatorConfig {
    /// Attempts an activity-sync task is retried in place before the
    /// re-replication fallback is considered
    pub activity_buffer_retry_count: usize,

    /// Attempts a history-events task is retried in place before the
    /// re-replication fallback is considered
    pub history_buffer_retry_count: usize,

    /// Upper bound on per-task retry attempts
    pub task_max_retry_count: usize,

    /// Upper bound on wall time spent retrying one task
    pub task_max_retry_duration: Duration,

    /// Deadline applied to each remote history-client call
    pub replication_timeout: Duration,

    /// Number of lanes in the sequential task executor
    pub task_worker_count: usize,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            activity_buffer_retry_count: 8,
            history_buffer_retry_count: 8,
            task_max_retry_count: 400,
            task_max_retry_duration: Duration::from_secs(15 * 60),
            replication_timeout: Duration::from_secs(30),
            task_worker_count: 16,
        }
    }
}
