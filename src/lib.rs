//! histree: the workflow history subsystem of a distributed
//! workflow-orchestration service.
//!
//! A running workflow is persisted as an append-only sequence of event
//! batches. The `persistence` area stores them, linearly (V1) or as a
//! branching tree supporting forks for reset and conflict resolution (V2).
//! The `replicator` area keeps peer clusters convergent by applying
//! replication tasks from an ordered stream, backfilling gaps on demand.

pub mod config;
pub mod execution;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod replicator;
pub mod serialization;

pub use config::ReplicatorConfig;
pub use execution::{
    DataBlob, Encoding, EventType, History, HistoryEvent, WorkflowIdentity, EMPTY_VERSION,
    FIRST_EVENT_ID,
};
pub use persistence::{
    HistoryBranch, HistoryError, HistoryManager, HistoryTreeManager, InMemoryEventStore,
};
pub use replicator::{
    HistoryClient, HistoryRereplicator, ReplicationError, ReplicationTaskProcessor,
};
pub use serialization::{HistorySerializer, QueryTaskToken, TaskToken, TaskTokenSerializer};
