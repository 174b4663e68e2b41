//! Remote history client seam
//!
//! The RPC transport lives outside this crate; the pipeline only needs the
//! two calls it makes against the peer cluster. Implementations are expected
//! to translate peer-side failures into the `ReplicationError` taxonomy,
//! most importantly the retry-task variant with its backfill point.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::execution::History;
use crate::replicator::error::ReplicationError;

/// Mirror an activity's state onto the peer cluster
#[derive(Clone, Debug)]
pub struct SyncActivityRequest {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub version: i64,
    pub scheduled_id: i64,
    pub started_id: i64,
    pub attempt: i32,
    pub details: Bytes,
    pub last_failure_reason: String,
    pub last_worker_identity: String,
}

/// Apply a range of history events onto the peer cluster
#[derive(Clone, Debug)]
pub struct ReplicateEventsRequest {
    pub source_cluster: String,
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub first_event_id: i64,
    pub next_event_id: i64,
    pub version: i64,
    pub history: History,
    pub new_run_history: Option<History>,
    pub force_buffer_events: bool,
    pub reset_workflow: bool,
}

/// Client against the peer cluster's history service
#[async_trait]
pub trait HistoryClient: Send + Sync {
    async fn sync_activity(&self, request: &SyncActivityRequest) -> Result<(), ReplicationError>;

    async fn replicate_events(&self, request: &ReplicateEventsRequest)
        -> Result<(), ReplicationError>;
}
