//! Blob and token serialization
//!
//! Event batches travel through the store as opaque `DataBlob`s; this module
//! owns the encode/decode boundary. Task tokens are the client-facing JSON
//! envelopes handed out with dispatched tasks; their wire format is a
//! compatibility surface and must stay stable.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::execution::{DataBlob, Encoding, HistoryEvent};

/// Error raised at the serialization boundary
#[derive(Debug)]
pub enum SerializationError {
    Encode(String),
    Decode(String),
    /// Blob carries an encoding this build cannot decode
    UnsupportedEncoding(String),
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializationError::Encode(msg) => write!(f, "encode failure: {}", msg),
            SerializationError::Decode(msg) => write!(f, "decode failure: {}", msg),
            SerializationError::UnsupportedEncoding(tag) => {
                write!(f, "unsupported blob encoding: {}", tag)
            }
        }
    }
}

impl std::error::Error for SerializationError {}

/// Encodes event batches to blobs and back.
///
/// JSON is the only encoding written today; the encoding tag is persisted
/// per row so additional codecs can be introduced without rewriting history.
#[derive(Clone, Copy, Debug, Default)]
pub struct HistorySerializer;

impl HistorySerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize_batch(&self, events: &[HistoryEvent]) -> Result<DataBlob, SerializationError> {
        let data = serde_json::to_vec(events).map_err(|e| SerializationError::Encode(e.to_string()))?;
        Ok(DataBlob::new(Bytes::from(data), Encoding::Json))
    }

    pub fn deserialize_batch(&self, blob: &DataBlob) -> Result<Vec<HistoryEvent>, SerializationError> {
        match &blob.encoding {
            Encoding::Json => serde_json::from_slice(&blob.data)
                .map_err(|e| SerializationError::Decode(e.to_string())),
            other => Err(SerializationError::UnsupportedEncoding(
                other.as_str().to_string(),
            )),
        }
    }
}

/// Token identifying a dispatched workflow or activity task
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskToken {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub schedule_id: i64,
    pub schedule_attempt: i64,
    pub activity_id: String,
    pub workflow_type: String,
    pub activity_type: String,
}

/// Token identifying a dispatched query task
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTaskToken {
    pub domain_id: String,
    pub task_list: String,
    pub task_id: String,
}

/// JSON task-token serializer
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskTokenSerializer;

impl TaskTokenSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize(&self, token: &TaskToken) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(token).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    pub fn deserialize(&self, data: &[u8]) -> Result<TaskToken, SerializationError> {
        serde_json::from_slice(data).map_err(|e| SerializationError::Decode(e.to_string()))
    }

    pub fn serialize_query_token(&self, token: &QueryTaskToken) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(token).map_err(|e| SerializationError::Encode(e.to_string()))
    }

    pub fn deserialize_query_token(&self, data: &[u8]) -> Result<QueryTaskToken, SerializationError> {
        serde_json::from_slice(data).map_err(|e| SerializationError::Decode(e.to_string()))
    }
}
