//! Replication stream seam
//!
//! Tasks arrive on an ordered message stream (one topic per source
//! cluster). Each message carries a JSON replication payload and a handle
//! that must be acked or nacked exactly once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::execution::History;

/// Handle to one in-flight stream message.
///
/// Implementations are not expected to fail; observed errors are logged by
/// the task runtime, never propagated.
#[async_trait]
pub trait StreamMessage: Send + Sync {
    async fn ack(&self) -> Result<(), String>;
    async fn nack(&self) -> Result<(), String>;
}

/// Ordered source of replication messages
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Next message in commit order; `None` once the stream is closed
    async fn receive(&self) -> Option<(Vec<u8>, Arc<dyn StreamMessage>)>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncActivityAttributes {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub version: i64,
    pub scheduled_id: i64,
    pub started_id: i64,
    pub attempt: i32,
    #[serde(default)]
    pub details: Vec<u8>,
    #[serde(default)]
    pub last_failure_reason: String,
    #[serde(default)]
    pub last_worker_identity: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEventsAttributes {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub first_event_id: i64,
    pub next_event_id: i64,
    pub version: i64,
    pub history: History,
    #[serde(default)]
    pub new_run_history: Option<History>,
    #[serde(default)]
    pub reset_workflow: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMetadataAttributes {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub first_event_id: i64,
    pub next_event_id: i64,
}

/// One replication task as carried on the stream
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "taskType", rename_all = "camelCase")]
pub enum ReplicationPayload {
    SyncActivity(SyncActivityAttributes),
    HistoryEvents(HistoryEventsAttributes),
    HistoryMetadata(HistoryMetadataAttributes),
}
