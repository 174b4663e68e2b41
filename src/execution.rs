//! Core workflow execution identifiers and history event model

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel batch version for rows written before versioning existed
pub const EMPTY_VERSION: i64 = -1;

/// Event id sentinel meaning "no event"
pub const EMPTY_EVENT_ID: i64 = 0;

/// First valid event id in any history
pub const FIRST_EVENT_ID: i64 = 1;

/// Uniquely names a single workflow execution across the cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowIdentity {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
}

impl WorkflowIdentity {
    pub fn new(domain_id: Uuid, workflow_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            domain_id,
            workflow_id: workflow_id.into(),
            run_id,
        }
    }
}

impl std::fmt::Display for WorkflowIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.domain_id, self.workflow_id, self.run_id)
    }
}

/// Encoding tag attached to every persisted event batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Binary,
    /// Unrecognized tag read back from storage; preserved for forward compatibility
    Unknown(String),
}

impl Encoding {
    pub fn as_str(&self) -> &str {
        match self {
            Encoding::Json => "json",
            Encoding::Binary => "binary",
            Encoding::Unknown(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "json" => Encoding::Json,
            "binary" => Encoding::Binary,
            other => Encoding::Unknown(other.to_string()),
        }
    }
}

/// Opaque encoded payload plus its encoding tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataBlob {
    pub data: Bytes,
    pub encoding: Encoding,
}

impl DataBlob {
    pub fn new(data: Bytes, encoding: Encoding) -> Self {
        Self { data, encoding }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The minimum event structure this subsystem inspects.
///
/// The history store treats event payloads as opaque; the only variant the
/// replication pipeline looks inside is the continued-as-new close event,
/// which carries the pointer to the next run in the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    WorkflowExecutionStarted,
    WorkflowExecutionCompleted,
    #[serde(rename_all = "camelCase")]
    WorkflowExecutionContinuedAsNew {
        new_run_id: Uuid,
    },
    ActivityTaskScheduled,
    ActivityTaskStarted,
    Generic(String),
}

/// A single workflow history event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub event_id: i64,
    pub version: i64,
    pub event_type: EventType,
}

impl HistoryEvent {
    pub fn new(event_id: i64, version: i64, event_type: EventType) -> Self {
        Self {
            event_id,
            version,
            event_type,
        }
    }
}

/// One decoded event batch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub events: Vec<HistoryEvent>,
}

impl History {
    pub fn new(events: Vec<HistoryEvent>) -> Self {
        Self { events }
    }

    /// Run id the workflow chained into, if this batch closes with a
    /// continued-as-new event
    pub fn continued_run_id(&self) -> Option<Uuid> {
        match self.events.last() {
            Some(HistoryEvent {
                event_type: EventType::WorkflowExecutionContinuedAsNew { new_run_id },
                ..
            }) => Some(*new_run_id),
            _ => None,
        }
    }
}
