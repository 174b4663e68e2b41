//! History V2 manager: the tree-structured event log
//!
//! Every run's history is a tree; a branch token names one root-to-leaf
//! path. Forking is non-atomic: `fork_history_branch` records the new branch
//! with an in-progress fork record, and the forker later calls
//! `complete_fork_branch` to commit or discard it. Deletion trims only the
//! parts of a path no other branch can reach, using nothing but persisted
//! tree rows to decide.
//!
//! Node rows reuse the events schema: the tree id fills the domain and
//! workflow columns, the branch id fills the run column, and the node id is
//! the first-event-id key.

use slog::Logger;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

use crate::execution::{History, HistoryEvent, EMPTY_VERSION};
use crate::persistence::branch::{BranchAncestor, HistoryBranch};
use crate::persistence::driver::{
    EventStoreDriver, EventsFilter, EventsRow, ForkStatus, HistoryTreeFilter, HistoryTreeRow,
};
use crate::persistence::error::{DriverError, HistoryError};
use crate::persistence::page::{deserialize_page_token, serialize_page_token};
use crate::serialization::HistorySerializer;

pub struct AppendHistoryNodesRequest {
    pub branch_token: Vec<u8>,
    pub events: Vec<HistoryEvent>,
    pub batch_version: i64,
    pub transaction_id: i64,
}

pub struct ForkHistoryBranchRequest {
    pub fork_branch_token: Vec<u8>,
    pub fork_node_id: i64,
    pub info: String,
}

#[derive(Debug)]
pub struct ForkHistoryBranchResponse {
    pub new_branch_token: Vec<u8>,
}

pub struct CompleteForkBranchRequest {
    pub branch_token: Vec<u8>,
    pub success: bool,
}

#[derive(Clone)]
pub struct ReadHistoryBranchRequest {
    pub branch_token: Vec<u8>,
    pub min_node_id: i64,
    pub max_node_id: i64,
    pub page_size: usize,
    /// Highest batch version seen on earlier pages of this read;
    /// `EMPTY_VERSION` on a fresh read
    pub last_batch_version: i64,
    pub next_page_token: Vec<u8>,
}

impl ReadHistoryBranchRequest {
    pub fn new(branch_token: Vec<u8>, min_node_id: i64, max_node_id: i64, page_size: usize) -> Self {
        Self {
            branch_token,
            min_node_id,
            max_node_id,
            page_size,
            last_batch_version: EMPTY_VERSION,
            next_page_token: Vec::new(),
        }
    }
}

pub struct ReadHistoryBranchResponse {
    pub events: Vec<HistoryEvent>,
    /// Encoded bytes consumed producing this page
    pub size: usize,
    /// Running maximum batch version; feed back on the next page
    pub last_batch_version: i64,
    pub next_page_token: Vec<u8>,
}

pub struct ReadHistoryBranchByBatchResponse {
    pub history: Vec<History>,
    pub size: usize,
    pub last_batch_version: i64,
    pub next_page_token: Vec<u8>,
}

pub struct GetHistoryTreeResponse {
    pub branches: Vec<HistoryTreeRow>,
}

impl GetHistoryTreeResponse {
    /// Branches whose fork has not been completed yet
    pub fn forking_in_progress(&self) -> Vec<&HistoryTreeRow> {
        self.branches
            .iter()
            .filter(|row| row.status == ForkStatus::InProgress)
            .collect()
    }
}

/// Manager for V2 tree histories
pub struct HistoryTreeManager {
    driver: Arc<dyn EventStoreDriver>,
    serializer: HistorySerializer,
    logger: Logger,
}

/// Ancestor chain for a branch forked off `parent` at `fork_node_id`.
///
/// Cutting above the parent's begin node appends the parent itself as the
/// final ancestor; cutting inside an ancestor range truncates the chain at
/// the ancestor owning the fork point.
fn fork_ancestors(parent: &HistoryBranch, fork_node_id: i64) -> Vec<BranchAncestor> {
    if fork_node_id > parent.begin_node_id() {
        let mut ancestors = parent.ancestors.clone();
        ancestors.push(BranchAncestor {
            branch_id: parent.branch_id,
            end_node_id: fork_node_id,
        });
        return ancestors;
    }
    let mut ancestors = Vec::new();
    for ancestor in &parent.ancestors {
        if ancestor.end_node_id >= fork_node_id {
            ancestors.push(BranchAncestor {
                branch_id: ancestor.branch_id,
                end_node_id: fork_node_id,
            });
            break;
        }
        ancestors.push(ancestor.clone());
    }
    ancestors
}

/// Physical segments of a branch path, leaf first.
///
/// Each entry is (branch id, begin node, end node); the leaf's end is
/// unbounded.
fn branch_segments(branch: &HistoryBranch) -> Vec<(Uuid, i64, i64)> {
    let mut segments = vec![(branch.branch_id, branch.begin_node_id(), i64::MAX)];
    for (index, ancestor) in branch.ancestors.iter().enumerate().rev() {
        let begin = if index == 0 {
            1
        } else {
            branch.ancestors[index - 1].end_node_id
        };
        segments.push((ancestor.branch_id, begin, ancestor.end_node_id));
    }
    segments
}

impl HistoryTreeManager {
    pub fn new(driver: Arc<dyn EventStoreDriver>, logger: Logger) -> Self {
        Self {
            driver,
            serializer: HistorySerializer::new(),
            logger,
        }
    }

    fn node_filter(tree_id: Uuid, branch_id: Uuid) -> EventsFilter {
        EventsFilter {
            domain_id: tree_id,
            workflow_id: tree_id.to_string(),
            run_id: branch_id,
            first_event_id: None,
            next_event_id: None,
            page_size: None,
        }
    }

    /// Create the root branch of a new tree
    pub async fn new_history_branch(&self, tree_id: Uuid) -> Result<Vec<u8>, HistoryError> {
        let branch = HistoryBranch::new_root(tree_id, Uuid::new_v4());
        self.driver
            .insert_into_history_tree(HistoryTreeRow {
                tree_id,
                branch_id: branch.branch_id,
                ancestors: Vec::new(),
                fork_time: SystemTime::now(),
                info: "root".to_string(),
                status: ForkStatus::Completed,
            })
            .await
            .map_err(map_driver_error)?;
        Ok(branch.encode().to_vec())
    }

    /// Append one event batch as a node on the branch
    pub async fn append_history_nodes(
        &self,
        request: &AppendHistoryNodesRequest,
    ) -> Result<usize, HistoryError> {
        let branch = HistoryBranch::decode(&request.branch_token)?;
        let node_id = match request.events.first() {
            Some(event) => event.event_id,
            None => {
                return Err(HistoryError::InvalidRequest(
                    "append requires at least one event".to_string(),
                ))
            }
        };
        if node_id < branch.begin_node_id() {
            return Err(HistoryError::InvalidRequest(format!(
                "node id {} precedes branch begin node {}",
                node_id,
                branch.begin_node_id()
            )));
        }

        let blob = self
            .serializer
            .serialize_batch(&request.events)
            .map_err(|e| HistoryError::Internal(e.to_string()))?;
        let size = blob.len();
        let base = Self::node_filter(branch.tree_id, branch.branch_id);
        self.driver
            .insert_into_events(EventsRow {
                domain_id: base.domain_id,
                workflow_id: base.workflow_id,
                run_id: base.run_id,
                first_event_id: node_id,
                batch_version: request.batch_version,
                range_id: 0,
                tx_id: request.transaction_id,
                data: blob.data,
                data_encoding: blob.encoding,
            })
            .await
            .map_err(map_driver_error)?;
        Ok(size)
    }

    /// Start a fork: persist the new branch with an in-progress fork record
    pub async fn fork_history_branch(
        &self,
        request: &ForkHistoryBranchRequest,
    ) -> Result<ForkHistoryBranchResponse, HistoryError> {
        let parent = HistoryBranch::decode(&request.fork_branch_token)?;
        if request.fork_node_id <= 1 {
            return Err(HistoryError::InvalidRequest(format!(
                "fork node id must be above 1, got {}",
                request.fork_node_id
            )));
        }

        let child = HistoryBranch {
            tree_id: parent.tree_id,
            branch_id: Uuid::new_v4(),
            ancestors: fork_ancestors(&parent, request.fork_node_id),
        };
        self.driver
            .insert_into_history_tree(HistoryTreeRow {
                tree_id: child.tree_id,
                branch_id: child.branch_id,
                ancestors: child.ancestors.clone(),
                fork_time: SystemTime::now(),
                info: request.info.clone(),
                status: ForkStatus::InProgress,
            })
            .await
            .map_err(map_driver_error)?;
        Ok(ForkHistoryBranchResponse {
            new_branch_token: child.encode().to_vec(),
        })
    }

    /// Commit or discard a fork started by `fork_history_branch`
    pub async fn complete_fork_branch(
        &self,
        request: &CompleteForkBranchRequest,
    ) -> Result<(), HistoryError> {
        let branch = HistoryBranch::decode(&request.branch_token)?;
        let filter = HistoryTreeFilter {
            tree_id: branch.tree_id,
            branch_id: Some(branch.branch_id),
        };
        let rows = self
            .driver
            .select_from_history_tree(&filter)
            .await
            .map_err(map_driver_error)?;
        let row = rows.into_iter().next().ok_or_else(|| {
            HistoryError::EntityNotExists(format!("branch {} not found", branch.branch_id))
        })?;

        if request.success {
            self.driver
                .update_history_tree(HistoryTreeRow {
                    status: ForkStatus::Completed,
                    ..row
                })
                .await
                .map_err(map_driver_error)
        } else {
            // discard the forked suffix and the record itself
            let mut node_filter = Self::node_filter(branch.tree_id, branch.branch_id);
            node_filter.first_event_id = Some(branch.begin_node_id());
            self.driver
                .delete_from_events(&node_filter)
                .await
                .map_err(map_driver_error)?;
            self.driver
                .delete_from_history_tree(&filter)
                .await
                .map_err(map_driver_error)
        }
    }

    /// All branch rows of the token's tree
    pub async fn get_history_tree(
        &self,
        branch_token: &[u8],
    ) -> Result<GetHistoryTreeResponse, HistoryError> {
        let branch = HistoryBranch::decode(branch_token)?;
        let branches = self
            .driver
            .select_from_history_tree(&HistoryTreeFilter {
                tree_id: branch.tree_id,
                branch_id: None,
            })
            .await
            .map_err(map_driver_error)?;
        Ok(GetHistoryTreeResponse { branches })
    }

    pub async fn read_history_branch(
        &self,
        request: &ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchResponse, HistoryError> {
        let (batches, size, last_batch_version, next_page_token) =
            self.read_branch_page(request).await?;
        let events = batches.into_iter().flat_map(|b| b.events).collect();
        Ok(ReadHistoryBranchResponse {
            events,
            size,
            last_batch_version,
            next_page_token,
        })
    }

    pub async fn read_history_branch_by_batch(
        &self,
        request: &ReadHistoryBranchRequest,
    ) -> Result<ReadHistoryBranchByBatchResponse, HistoryError> {
        let (history, size, last_batch_version, next_page_token) =
            self.read_branch_page(request).await?;
        Ok(ReadHistoryBranchByBatchResponse {
            history,
            size,
            last_batch_version,
            next_page_token,
        })
    }

    /// One physical page of a branch read.
    ///
    /// Walks the ancestor chain to decide which branch physically owns each
    /// node sub-range, reads the owning segments in order, and applies the
    /// running-maximum version shadow rule across the page.
    async fn read_branch_page(
        &self,
        request: &ReadHistoryBranchRequest,
    ) -> Result<(Vec<History>, usize, i64, Vec<u8>), HistoryError> {
        if request.min_node_id < 1 || request.min_node_id >= request.max_node_id {
            return Err(HistoryError::InvalidRequest(format!(
                "invalid node range [{}, {})",
                request.min_node_id, request.max_node_id
            )));
        }
        let branch = HistoryBranch::decode(&request.branch_token)?;
        let fresh = request.next_page_token.is_empty();
        let mut current = if fresh {
            request.min_node_id
        } else {
            deserialize_page_token(&request.next_page_token)? + 1
        };

        // oldest-first segments of the path, each owning [begin, end)
        let mut segments = branch_segments(&branch);
        segments.reverse();

        let mut batches = Vec::new();
        let mut size = 0usize;
        let mut rows_read = 0usize;
        let mut max_version = request.last_batch_version;
        for (branch_id, begin, end) in segments {
            if rows_read >= request.page_size || current >= request.max_node_id {
                break;
            }
            let lower = current.max(begin);
            let upper = request.max_node_id.min(end);
            if lower >= upper {
                continue;
            }

            let mut filter = Self::node_filter(branch.tree_id, branch_id);
            filter.first_event_id = Some(lower);
            filter.next_event_id = Some(upper);
            filter.page_size = Some(request.page_size - rows_read);
            let rows = self
                .driver
                .select_from_events(&filter)
                .await
                .map_err(map_driver_error)?;

            for row in rows {
                rows_read += 1;
                current = row.first_event_id;
                let batch_version = if row.batch_version > 0 {
                    row.batch_version
                } else {
                    EMPTY_VERSION
                };
                if batch_version < max_version {
                    // shadowed by a later rewrite of the same prefix
                    continue;
                }
                max_version = batch_version;
                size += row.data.len();
                let events = self
                    .serializer
                    .deserialize_batch(&crate::execution::DataBlob::new(row.data, row.data_encoding))
                    .map_err(|e| HistoryError::Internal(e.to_string()))?;
                batches.push(History::new(events));
            }
        }

        if fresh && batches.is_empty() {
            return Err(HistoryError::EntityNotExists(format!(
                "no history nodes in [{}, {})",
                request.min_node_id, request.max_node_id
            )));
        }

        let next_page_token = if rows_read >= request.page_size {
            serialize_page_token(current)
        } else {
            Vec::new()
        };
        Ok((batches, size, max_version, next_page_token))
    }

    /// Delete the parts of the branch no other branch can reach.
    ///
    /// Refuses with condition-failed while another branch's fork is still in
    /// progress; the caller-side deletion protocol handles reconciliation.
    /// Deleting an already-deleted branch is not an error.
    pub async fn delete_history_branch(&self, branch_token: &[u8]) -> Result<(), HistoryError> {
        let branch = HistoryBranch::decode(branch_token)?;
        let tree = self
            .driver
            .select_from_history_tree(&HistoryTreeFilter {
                tree_id: branch.tree_id,
                branch_id: None,
            })
            .await
            .map_err(map_driver_error)?;

        let fork_in_progress = tree
            .iter()
            .any(|row| row.branch_id != branch.branch_id && row.status == ForkStatus::InProgress);
        if fork_in_progress {
            return Err(HistoryError::ConditionFailed(
                "tree has forks in progress".to_string(),
            ));
        }

        // highest node id of each physical branch still referenced by a
        // surviving branch; a surviving branch owns its whole suffix
        let mut referenced: HashMap<Uuid, i64> = HashMap::new();
        for row in tree.iter().filter(|row| row.branch_id != branch.branch_id) {
            referenced.insert(row.branch_id, i64::MAX);
            for ancestor in &row.ancestors {
                let entry = referenced.entry(ancestor.branch_id).or_insert(0);
                *entry = (*entry).max(ancestor.end_node_id);
            }
        }

        for (branch_id, begin, end) in branch_segments(&branch) {
            let shared_up_to = referenced.get(&branch_id).copied().unwrap_or(begin);
            let delete_from = shared_up_to.max(begin);
            if delete_from >= end {
                // segment fully shared; everything older is too
                break;
            }
            let mut filter = Self::node_filter(branch.tree_id, branch_id);
            filter.first_event_id = Some(delete_from);
            filter.next_event_id = Some(end);
            self.driver
                .delete_from_events(&filter)
                .await
                .map_err(map_driver_error)?;
            slog::debug!(self.logger, "deleted history branch segment";
                "tree_id" => %branch.tree_id,
                "branch_id" => %branch_id,
                "from_node_id" => delete_from);
            if delete_from > begin {
                break;
            }
        }

        self.driver
            .delete_from_history_tree(&HistoryTreeFilter {
                tree_id: branch.tree_id,
                branch_id: Some(branch.branch_id),
            })
            .await
            .map_err(map_driver_error)
    }
}

fn map_driver_error(error: DriverError) -> HistoryError {
    match error {
        DriverError::DuplicateEntry(msg) => HistoryError::ConditionFailed(msg),
        DriverError::NoRows(msg) => HistoryError::EntityNotExists(msg),
        DriverError::Io(msg) => HistoryError::Internal(msg),
    }
}
