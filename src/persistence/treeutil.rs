//! Branch deletion protocol and full-page reads
//!
//! Deleting a tree branch must cope with forks that are still being created:
//! fork creation is not atomic, and a forker that crashed mid-fork leaves an
//! in-progress record behind forever. The protocol here assumes a fork older
//! than `FORK_ABANDON_THRESHOLD` will never complete on its own,
//! force-completes it, and retries the delete. That assumption can be wrong:
//! if the forker was merely slow, the parent suffix shared with its child
//! stays behind as an unreachable zombie segment. The protocol is safe (it
//! never deletes data another branch relies on) but not complete.

use slog::Logger;
use std::time::{Duration, SystemTime};

use crate::execution::{History, HistoryEvent};
use crate::metrics::{Counter, MetricsClient, MetricsScope};
use crate::persistence::branch::new_history_branch_token_from_another;
use crate::persistence::error::HistoryError;
use crate::persistence::tree::{
    CompleteForkBranchRequest, HistoryTreeManager, ReadHistoryBranchRequest,
};

/// Age after which an in-progress fork is assumed abandoned
pub const FORK_ABANDON_THRESHOLD: Duration = Duration::from_secs(60);

/// Delete a branch, reconciling abandoned forks along the way.
///
/// 1. Attempt the delete; done on success.
/// 2. On condition-failed, enumerate in-progress forks in the tree:
///    older than the threshold are force-completed (success assumed; the
///    worst case is leaked data, never lost data), younger ones surface
///    service-busy so the caller retries later.
/// 3. Retry the delete once.
pub async fn delete_workflow_execution_history_v2(
    manager: &HistoryTreeManager,
    branch_token: &[u8],
    metrics: &dyn MetricsClient,
    logger: &Logger,
) -> Result<(), HistoryError> {
    match manager.delete_history_branch(branch_token).await {
        Ok(()) => return Ok(()),
        Err(HistoryError::ConditionFailed(_)) => {}
        Err(other) => return Err(other),
    }

    // rare: some branch of this tree has an incomplete fork
    let tree = manager.get_history_tree(branch_token).await?;
    let now = SystemTime::now();
    let mut reconciled_info = String::new();
    for fork in tree.forking_in_progress() {
        let age = now
            .duration_since(fork.fork_time)
            .unwrap_or(Duration::ZERO);
        if age > FORK_ABANDON_THRESHOLD {
            // the forker likely crashed before completing; we cannot know
            // whether the fork succeeded, so assume success, which at worst
            // leaks a segment that will never be deleted
            reconciled_info.push(';');
            reconciled_info.push_str(&fork.info);
            let token = new_history_branch_token_from_another(fork.branch_id, branch_token)?;
            manager
                .complete_fork_branch(&CompleteForkBranchRequest {
                    branch_token: token.to_vec(),
                    success: true,
                })
                .await?;
            metrics.inc_counter(MetricsScope::HistoryBranchDeletion, Counter::ZombieHistorySegments);
        } else {
            return Err(HistoryError::ServiceBusy(
                "waiting for forking to complete".to_string(),
            ));
        }
    }
    if !reconciled_info.is_empty() {
        slog::warn!(logger, "seeing incomplete forking branches when deleting branch";
            "detail" => reconciled_info.as_str());
    }

    manager.delete_history_branch(branch_token).await
}

/// Read until a full page of events is assembled or the branch is exhausted.
///
/// A physical store page is bounded in rows and may be thinned by shadowed
/// batches, so a single read can fall short of `page_size` events. Returns
/// the events, the encoded bytes consumed, the running batch version, and
/// the continuation token; feed the last two into the next call.
pub async fn read_full_page_events(
    manager: &HistoryTreeManager,
    request: &ReadHistoryBranchRequest,
) -> Result<(Vec<HistoryEvent>, usize, i64, Vec<u8>), HistoryError> {
    let mut request = request.clone();
    let mut events = Vec::new();
    let mut size = 0usize;
    loop {
        let response = manager.read_history_branch(&request).await?;
        events.extend(response.events);
        size += response.size;
        if events.len() >= request.page_size || response.next_page_token.is_empty() {
            return Ok((
                events,
                size,
                response.last_batch_version,
                response.next_page_token,
            ));
        }
        request.last_batch_version = response.last_batch_version;
        request.next_page_token = response.next_page_token;
    }
}

/// Batch-granular variant of `read_full_page_events`; progress is measured
/// by the cumulative event count across batches, not the batch count.
pub async fn read_full_page_events_by_batch(
    manager: &HistoryTreeManager,
    request: &ReadHistoryBranchRequest,
) -> Result<(Vec<History>, usize, i64, Vec<u8>), HistoryError> {
    let mut request = request.clone();
    let mut batches: Vec<History> = Vec::new();
    let mut events_read = 0usize;
    let mut size = 0usize;
    loop {
        let response = manager.read_history_branch_by_batch(&request).await?;
        for batch in &response.history {
            events_read += batch.events.len();
        }
        batches.extend(response.history);
        size += response.size;
        if events_read >= request.page_size || response.next_page_token.is_empty() {
            return Ok((
                batches,
                size,
                response.last_batch_version,
                response.next_page_token,
            ));
        }
        request.last_batch_version = response.last_batch_version;
        request.next_page_token = response.next_page_token;
    }
}
