//! Error taxonomy for the replication pipeline

use std::fmt;
use uuid::Uuid;

use crate::persistence::HistoryError;

/// Errors surfaced while applying replication tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    /// The peer is missing history before the range being applied; the
    /// carried (run id, next event id) names the point to backfill from
    RetryTask {
        message: String,
        run_id: Option<Uuid>,
        next_event_id: Option<i64>,
    },

    /// Transient backpressure on the peer
    ServiceBusy(String),

    /// Unexpected failure on the peer or in transit
    Internal(String),

    /// Referenced execution or range does not exist
    EntityNotExists(String),

    /// Malformed task or request
    InvalidRequest(String),

    /// Per-call deadline expired
    Timeout(String),

    /// Failure from the local history store
    History(HistoryError),
}

impl ReplicationError {
    /// Whether the task runtime should retry in place
    pub fn is_transient(&self) -> bool {
        match self {
            ReplicationError::ServiceBusy(_)
            | ReplicationError::Internal(_)
            | ReplicationError::Timeout(_) => true,
            ReplicationError::History(inner) => matches!(
                inner,
                HistoryError::ServiceBusy(_) | HistoryError::Internal(_) | HistoryError::Timeout(_)
            ),
            _ => false,
        }
    }

    /// The backfill point, when this is a retry-task error carrying one
    pub fn retry_task_target(&self) -> Option<(Uuid, i64)> {
        match self {
            ReplicationError::RetryTask {
                run_id: Some(run_id),
                next_event_id: Some(next_event_id),
                ..
            } => Some((*run_id, *next_event_id)),
            _ => None,
        }
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationError::RetryTask {
                message,
                run_id,
                next_event_id,
            } => write!(
                f,
                "retry task: {} (run id {:?}, next event id {:?})",
                message, run_id, next_event_id
            ),
            ReplicationError::ServiceBusy(msg) => write!(f, "service busy: {}", msg),
            ReplicationError::Internal(msg) => write!(f, "internal error: {}", msg),
            ReplicationError::EntityNotExists(msg) => write!(f, "entity not exists: {}", msg),
            ReplicationError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            ReplicationError::Timeout(msg) => write!(f, "timeout: {}", msg),
            ReplicationError::History(inner) => write!(f, "history store: {}", inner),
        }
    }
}

impl std::error::Error for ReplicationError {}

impl From<HistoryError> for ReplicationError {
    fn from(error: HistoryError) -> Self {
        ReplicationError::History(error)
    }
}
