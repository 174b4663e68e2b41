//! History V1 manager: the legacy linear event log
//!
//! Batched appends with overwrite-on-higher-transaction, versioned paginated
//! reads, and full-history deletion, all on top of the events-table driver.
//!
//! Reads happen at two levels. The blob level applies the shadow rule: rows
//! are scanned in ascending first-event-id order while the running maximum
//! batch version is threaded through the page; any row below the running
//! maximum was superseded by a rewrite of the same prefix and is skipped.
//! The decoded level deserializes surviving blobs, drops stale batches whose
//! events were already returned, and enforces the anchor contract: a fresh
//! read must find a batch starting exactly at the requested first event id.

use serde::{Deserialize, Serialize};
use slog::Logger;
use std::sync::Arc;

use crate::execution::{DataBlob, History, HistoryEvent, WorkflowIdentity, EMPTY_VERSION};
use crate::persistence::driver::{EventStoreDriver, EventsFilter, EventsRow};
use crate::persistence::error::{DriverError, HistoryError};
use crate::persistence::page::{deserialize_page_token, serialize_page_token};
use crate::serialization::HistorySerializer;

pub struct AppendHistoryEventsRequest {
    pub identity: WorkflowIdentity,
    pub first_event_id: i64,
    pub event_batch_version: i64,
    pub range_id: i64,
    pub transaction_id: i64,
    pub events: Vec<HistoryEvent>,
    pub overwrite: bool,
}

pub struct AppendHistoryEventsResponse {
    /// Encoded size of the persisted batch
    pub size: usize,
}

#[derive(Clone)]
pub struct GetWorkflowExecutionHistoryRequest {
    pub identity: WorkflowIdentity,
    pub first_event_id: i64,
    pub next_event_id: i64,
    pub page_size: usize,
    pub next_page_token: Vec<u8>,
}

pub struct GetWorkflowExecutionHistoryResponse {
    pub history: History,
    pub next_page_token: Vec<u8>,
}

pub struct GetWorkflowExecutionHistoryByBatchResponse {
    pub history: Vec<History>,
    pub next_page_token: Vec<u8>,
}

/// Blob-level read result
pub struct ReadHistoryBlobsResponse {
    pub blobs: Vec<DataBlob>,
    pub last_event_batch_version: i64,
    pub next_page_token: Vec<u8>,
}

/// Pagination state threaded between decoded-level pages
#[derive(Serialize, Deserialize)]
struct HistoryPageToken {
    last_event_id: i64,
    last_batch_version: i64,
    store_token: Vec<u8>,
}

/// Manager for V1 linear histories
pub struct HistoryManager {
    driver: Arc<dyn EventStoreDriver>,
    serializer: HistorySerializer,
    logger: Logger,
}

impl HistoryManager {
    pub fn new(driver: Arc<dyn EventStoreDriver>, logger: Logger) -> Self {
        Self {
            driver,
            serializer: HistorySerializer::new(),
            logger,
        }
    }

    pub async fn append_history_events(
        &self,
        request: &AppendHistoryEventsRequest,
    ) -> Result<AppendHistoryEventsResponse, HistoryError> {
        if request.events.is_empty() {
            return Err(HistoryError::InvalidRequest(
                "append requires at least one event".to_string(),
            ));
        }
        let blob = self
            .serializer
            .serialize_batch(&request.events)
            .map_err(|e| HistoryError::Internal(e.to_string()))?;
        let size = blob.len();
        let row = EventsRow {
            domain_id: request.identity.domain_id,
            workflow_id: request.identity.workflow_id.clone(),
            run_id: request.identity.run_id,
            first_event_id: request.first_event_id,
            batch_version: request.event_batch_version,
            range_id: request.range_id,
            tx_id: request.transaction_id,
            data: blob.data,
            data_encoding: blob.encoding,
        };

        if request.overwrite {
            self.overwrite_history_events(request, row).await?;
        } else {
            self.driver.insert_into_events(row).await.map_err(|e| match e {
                DriverError::DuplicateEntry(msg) => {
                    HistoryError::ConditionFailed(format!("event batch already exists: {}", msg))
                }
                other => HistoryError::Internal(other.to_string()),
            })?;
        }
        Ok(AppendHistoryEventsResponse { size })
    }

    /// Lock the incumbent row, enforce the (range-id, tx-id) fence, update
    async fn overwrite_history_events(
        &self,
        request: &AppendHistoryEventsRequest,
        row: EventsRow,
    ) -> Result<(), HistoryError> {
        let filter = EventsFilter {
            domain_id: request.identity.domain_id,
            workflow_id: request.identity.workflow_id.clone(),
            run_id: request.identity.run_id,
            first_event_id: Some(request.first_event_id),
            next_event_id: None,
            page_size: None,
        };

        let mut tx = self
            .driver
            .begin()
            .await
            .map_err(|e| HistoryError::Internal(e.to_string()))?;

        let incumbent = match tx.lock_events(&filter).await {
            Ok(row) => row,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(HistoryError::Internal(e.to_string()));
            }
        };
        if incumbent.range_id > request.range_id {
            let _ = tx.rollback().await;
            return Err(HistoryError::ConditionFailed(format!(
                "expected range id <= {}, got {}",
                request.range_id, incumbent.range_id
            )));
        }
        if incumbent.tx_id >= request.transaction_id {
            let _ = tx.rollback().await;
            return Err(HistoryError::ConditionFailed(format!(
                "expected tx id < {}, got {}",
                request.transaction_id, incumbent.tx_id
            )));
        }

        let affected = match tx.update_events(row).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(HistoryError::Internal(e.to_string()));
            }
        };
        if affected != 1 {
            let _ = tx.rollback().await;
            return Err(HistoryError::Internal(format!(
                "expected 1 row to be affected, got {}",
                affected
            )));
        }
        tx.commit()
            .await
            .map_err(|e| HistoryError::Internal(e.to_string()))
    }

    /// Blob-level paginated read with the shadow rule applied
    pub async fn read_history_blobs(
        &self,
        identity: &WorkflowIdentity,
        first_event_id: i64,
        next_event_id: i64,
        page_size: usize,
        last_event_batch_version: i64,
        next_page_token: &[u8],
    ) -> Result<ReadHistoryBlobsResponse, HistoryError> {
        let mut offset = first_event_id - 1;
        if !next_page_token.is_empty() {
            offset = deserialize_page_token(next_page_token)?;
        }

        let rows = self
            .driver
            .select_from_events(&EventsFilter {
                domain_id: identity.domain_id,
                workflow_id: identity.workflow_id.clone(),
                run_id: identity.run_id,
                first_event_id: Some(offset + 1),
                next_event_id: Some(next_event_id),
                page_size: Some(page_size),
            })
            .await
            .map_err(|e| HistoryError::Internal(e.to_string()))?;

        if rows.is_empty() {
            return Ok(ReadHistoryBlobsResponse {
                blobs: Vec::new(),
                last_event_batch_version,
                next_page_token: Vec::new(),
            });
        }

        let row_count = rows.len();
        let mut blobs = Vec::new();
        let mut max_version = last_event_batch_version;
        for row in rows {
            let batch_version = if row.batch_version > 0 {
                row.batch_version
            } else {
                EMPTY_VERSION
            };
            if batch_version >= max_version {
                blobs.push(DataBlob::new(row.data, row.data_encoding));
                max_version = batch_version;
            }
            offset = row.first_event_id;
        }

        let next_page_token = if row_count >= page_size {
            serialize_page_token(offset)
        } else {
            Vec::new()
        };
        Ok(ReadHistoryBlobsResponse {
            blobs,
            last_event_batch_version: max_version,
            next_page_token,
        })
    }

    pub async fn get_workflow_execution_history(
        &self,
        request: &GetWorkflowExecutionHistoryRequest,
    ) -> Result<GetWorkflowExecutionHistoryResponse, HistoryError> {
        let (batches, next_page_token) = self.read_decoded_page(request).await?;
        let events = batches.into_iter().flat_map(|b| b.events).collect();
        Ok(GetWorkflowExecutionHistoryResponse {
            history: History::new(events),
            next_page_token,
        })
    }

    pub async fn get_workflow_execution_history_by_batch(
        &self,
        request: &GetWorkflowExecutionHistoryRequest,
    ) -> Result<GetWorkflowExecutionHistoryByBatchResponse, HistoryError> {
        let (history, next_page_token) = self.read_decoded_page(request).await?;
        Ok(GetWorkflowExecutionHistoryByBatchResponse {
            history,
            next_page_token,
        })
    }

    async fn read_decoded_page(
        &self,
        request: &GetWorkflowExecutionHistoryRequest,
    ) -> Result<(Vec<History>, Vec<u8>), HistoryError> {
        let fresh = request.next_page_token.is_empty();
        let token = if fresh {
            HistoryPageToken {
                last_event_id: request.first_event_id - 1,
                last_batch_version: EMPTY_VERSION,
                store_token: Vec::new(),
            }
        } else {
            serde_json::from_slice(&request.next_page_token)
                .map_err(|e| HistoryError::InvalidRequest(format!("invalid page token: {}", e)))?
        };

        let response = self
            .read_history_blobs(
                &request.identity,
                request.first_event_id,
                request.next_event_id,
                request.page_size,
                token.last_batch_version,
                &token.store_token,
            )
            .await?;

        let mut batches: Vec<History> = Vec::new();
        let mut last_event_id = token.last_event_id;
        for blob in &response.blobs {
            let events = self
                .serializer
                .deserialize_batch(blob)
                .map_err(|e| HistoryError::Internal(e.to_string()))?;
            let batch_first = match events.first() {
                Some(event) => event.event_id,
                None => {
                    slog::error!(self.logger, "empty event batch in history read";
                        "workflow_id" => request.identity.workflow_id.as_str(),
                        "run_id" => %request.identity.run_id);
                    return Err(HistoryError::Internal("empty event batch".to_string()));
                }
            };

            if batch_first <= last_event_id {
                // superseded by an earlier batch covering the same events
                continue;
            }
            if batches.is_empty() && fresh {
                if batch_first != request.first_event_id {
                    return Err(HistoryError::EntityNotExists(format!(
                        "no event batch starting at {}",
                        request.first_event_id
                    )));
                }
            } else if batch_first != last_event_id + 1 {
                slog::error!(self.logger, "discontinuous event batch in history read";
                    "workflow_id" => request.identity.workflow_id.as_str(),
                    "run_id" => %request.identity.run_id,
                    "expected" => last_event_id + 1,
                    "got" => batch_first);
                return Err(HistoryError::Internal(
                    "corrupted history event batch".to_string(),
                ));
            }

            last_event_id = events.last().map(|e| e.event_id).unwrap_or(last_event_id);
            batches.push(History::new(events));
        }

        if fresh && batches.is_empty() {
            return Err(HistoryError::EntityNotExists(format!(
                "workflow history not found from event id {}",
                request.first_event_id
            )));
        }

        let next_page_token = if response.next_page_token.is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(&HistoryPageToken {
                last_event_id,
                last_batch_version: response.last_event_batch_version,
                store_token: response.next_page_token,
            })
            .map_err(|e| HistoryError::Internal(e.to_string()))?
        };
        Ok((batches, next_page_token))
    }

    /// Remove every batch of the execution; removing nothing is fine
    pub async fn delete_workflow_execution_history(
        &self,
        identity: &WorkflowIdentity,
    ) -> Result<(), HistoryError> {
        self.driver
            .delete_from_events(&EventsFilter::for_execution(
                identity.domain_id,
                identity.workflow_id.clone(),
                identity.run_id,
            ))
            .await
            .map_err(|e| HistoryError::Internal(e.to_string()))
    }
}
