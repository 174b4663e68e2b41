//! On-demand history re-replication
//!
//! When the peer cluster reports a gap (a retry-task error), the pipeline
//! backfills the missing range from this cluster's own V2 history and pushes
//! it to the peer before re-applying the task that tripped the gap. A
//! backfill may span several runs of the same workflow: a reset chains runs
//! together, and the close batch of each run carries the pointer to its
//! successor.

use async_trait::async_trait;
use slog::Logger;
use std::sync::Arc;
use uuid::Uuid;

use crate::execution::{History, FIRST_EVENT_ID};
use crate::persistence::tree::{HistoryTreeManager, ReadHistoryBranchRequest};
use crate::persistence::treeutil::read_full_page_events_by_batch;
use crate::replicator::client::{HistoryClient, ReplicateEventsRequest};
use crate::replicator::error::ReplicationError;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Backfills a peer cluster's history gap from local history
#[async_trait]
pub trait HistoryRereplicator: Send + Sync {
    /// Push [begin_event_id of begin_run_id, end_event_id of end_run_id)
    /// to the peer, walking the run chain in between
    async fn send_multi_workflow_history(
        &self,
        domain_id: Uuid,
        workflow_id: &str,
        begin_run_id: Uuid,
        begin_event_id: i64,
        end_run_id: Uuid,
        end_event_id: i64,
    ) -> Result<(), ReplicationError>;
}

/// Resolves the current branch token of a run.
///
/// Run-state bookkeeping (mutable state rows) lives outside this subsystem;
/// the re-replicator only needs the token to read the run's history.
#[async_trait]
pub trait BranchTokenProvider: Send + Sync {
    async fn branch_token(
        &self,
        domain_id: Uuid,
        workflow_id: &str,
        run_id: Uuid,
    ) -> Result<Vec<u8>, ReplicationError>;
}

/// Re-replicator reading from the local V2 history store
pub struct TreeHistoryRereplicator {
    source_cluster: String,
    history: Arc<HistoryTreeManager>,
    tokens: Arc<dyn BranchTokenProvider>,
    target: Arc<dyn HistoryClient>,
    page_size: usize,
    logger: Logger,
}

impl TreeHistoryRereplicator {
    pub fn new(
        source_cluster: impl Into<String>,
        history: Arc<HistoryTreeManager>,
        tokens: Arc<dyn BranchTokenProvider>,
        target: Arc<dyn HistoryClient>,
        logger: Logger,
    ) -> Self {
        Self {
            source_cluster: source_cluster.into(),
            history,
            tokens,
            target,
            page_size: DEFAULT_PAGE_SIZE,
            logger,
        }
    }

    /// Send one run's [first_event_id, next_event_id); returns the run the
    /// workflow chained into, if its close batch names one
    async fn send_single_workflow_history(
        &self,
        domain_id: Uuid,
        workflow_id: &str,
        run_id: Uuid,
        first_event_id: i64,
        next_event_id: i64,
    ) -> Result<Option<Uuid>, ReplicationError> {
        let branch_token = self
            .tokens
            .branch_token(domain_id, workflow_id, run_id)
            .await?;

        let mut request = ReadHistoryBranchRequest::new(
            branch_token,
            first_event_id,
            next_event_id,
            self.page_size,
        );
        let mut continued_run_id = None;
        loop {
            let (batches, _, last_batch_version, next_page_token) =
                read_full_page_events_by_batch(&self.history, &request).await?;
            if let Some(batch) = batches.last() {
                continued_run_id = batch.continued_run_id();
            }
            let events: Vec<_> = batches.into_iter().flat_map(|b| b.events).collect();
            if !events.is_empty() {
                let first_event_id = events[0].event_id;
                let next_event_id = events[events.len() - 1].event_id + 1;
                let version = events[events.len() - 1].version;
                let replicate = ReplicateEventsRequest {
                    source_cluster: self.source_cluster.clone(),
                    domain_id,
                    workflow_id: workflow_id.to_string(),
                    run_id,
                    first_event_id,
                    next_event_id,
                    version,
                    history: History::new(events),
                    new_run_history: None,
                    force_buffer_events: false,
                    reset_workflow: false,
                };
                self.target.replicate_events(&replicate).await?;
            }
            if next_page_token.is_empty() {
                return Ok(continued_run_id);
            }
            request.last_batch_version = last_batch_version;
            request.next_page_token = next_page_token;
        }
    }
}

#[async_trait]
impl HistoryRereplicator for TreeHistoryRereplicator {
    async fn send_multi_workflow_history(
        &self,
        domain_id: Uuid,
        workflow_id: &str,
        begin_run_id: Uuid,
        begin_event_id: i64,
        end_run_id: Uuid,
        end_event_id: i64,
    ) -> Result<(), ReplicationError> {
        slog::info!(self.logger, "re-replicating history range";
            "workflow_id" => workflow_id,
            "begin_run_id" => %begin_run_id,
            "begin_event_id" => begin_event_id,
            "end_run_id" => %end_run_id,
            "end_event_id" => end_event_id);

        let mut run_id = begin_run_id;
        loop {
            let first_event_id = if run_id == begin_run_id {
                begin_event_id
            } else {
                FIRST_EVENT_ID
            };
            let next_event_id = if run_id == end_run_id {
                end_event_id
            } else {
                i64::MAX
            };
            if first_event_id >= next_event_id {
                return Err(ReplicationError::InvalidRequest(format!(
                    "empty replication range [{}, {}) for run {}",
                    first_event_id, next_event_id, run_id
                )));
            }

            let continued_run_id = self
                .send_single_workflow_history(
                    domain_id,
                    workflow_id,
                    run_id,
                    first_event_id,
                    next_event_id,
                )
                .await?;

            if run_id == end_run_id {
                return Ok(());
            }
            match continued_run_id {
                Some(next_run_id) => run_id = next_run_id,
                None => {
                    return Err(ReplicationError::EntityNotExists(format!(
                        "run chain of workflow {} broke at {} before reaching {}",
                        workflow_id, run_id, end_run_id
                    )))
                }
            }
        }
    }
}
