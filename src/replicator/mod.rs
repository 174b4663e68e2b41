//! Cross-cluster replication pipeline: ordered stream consumption,
//! per-workflow sequential task execution, and on-demand re-replication
//! when the peer reports a history gap.

pub mod client;
pub mod error;
pub mod executor;
pub mod idlock;
pub mod message;
pub mod processor;
pub mod rereplicator;
pub mod task;

pub use client::{HistoryClient, ReplicateEventsRequest, SyncActivityRequest};
pub use error::ReplicationError;
pub use executor::SequentialTaskExecutor;
pub use idlock::IdMutex;
pub use message::{MessageStream, ReplicationPayload, StreamMessage};
pub use processor::ReplicationTaskProcessor;
pub use rereplicator::{BranchTokenProvider, HistoryRereplicator, TreeHistoryRereplicator};
pub use task::{
    ActivityReplicationTask, HistoryMetadataReplicationTask, HistoryReplicationTask,
    SequentialTask, TaskContext,
};
