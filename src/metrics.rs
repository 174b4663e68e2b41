//! Metrics client seam
//!
//! The actual sink (statsd, prometheus, ...) lives outside this crate; the
//! replication runtime only needs a counter and a timer per scope.

use std::time::Duration;

/// Scopes under which the replication runtime reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricsScope {
    SyncActivityTask,
    HistoryReplicationTask,
    HistoryMetadataReplicationTask,
    RereplicationByActivityReplication,
    RereplicationByHistoryReplication,
    RereplicationByHistoryMetadataReplication,
    HistoryBranchDeletion,
}

/// Counter names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    ReplicatorMessages,
    ClientRequests,
    /// Stale in-progress forks force-completed by the deletion protocol
    ZombieHistorySegments,
}

/// Timer names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Timer {
    ReplicatorLatency,
    ClientLatency,
}

/// Sink-agnostic metrics client
pub trait MetricsClient: Send + Sync {
    fn inc_counter(&self, scope: MetricsScope, counter: Counter);
    fn record_timer(&self, scope: MetricsScope, timer: Timer, elapsed: Duration);
}

/// Discards everything; the default when no sink is wired up
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetricsClient;

impl MetricsClient for NoopMetricsClient {
    fn inc_counter(&self, _scope: MetricsScope, _counter: Counter) {}
    fn record_timer(&self, _scope: MetricsScope, _timer: Timer, _elapsed: Duration) {}
}
