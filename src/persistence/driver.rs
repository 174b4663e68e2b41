//! Storage driver seam for the event blob store
//!
//! The row and filter schemas here are the logical shape of the two tables
//! backing history: `events` (one row per persisted event batch) and
//! `history_tree` (one row per branch, doubling as the fork record). A
//! concrete driver maps these to its physical schema; the in-memory driver
//! in this crate is the reference implementation of the contract.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::SystemTime;
use uuid::Uuid;

use crate::execution::Encoding;
use crate::persistence::branch::BranchAncestor;
use crate::persistence::error::DriverError;

/// One persisted event batch.
///
/// Primary key: (domain_id, workflow_id, run_id, first_event_id).
#[derive(Clone, Debug)]
pub struct EventsRow {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub first_event_id: i64,
    pub batch_version: i64,
    pub range_id: i64,
    pub tx_id: i64,
    pub data: Bytes,
    pub data_encoding: Encoding,
}

/// Filter over the events table.
///
/// `first_event_id` is an inclusive lower bound, `next_event_id` an
/// exclusive upper bound; a lock addresses a single row by setting
/// `first_event_id` alone.
#[derive(Clone, Debug)]
pub struct EventsFilter {
    pub domain_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub first_event_id: Option<i64>,
    pub next_event_id: Option<i64>,
    pub page_size: Option<usize>,
}

impl EventsFilter {
    /// Filter matching every row of one execution
    pub fn for_execution(domain_id: Uuid, workflow_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            domain_id,
            workflow_id: workflow_id.into(),
            run_id,
            first_event_id: None,
            next_event_id: None,
            page_size: None,
        }
    }
}

/// Fork lifecycle state carried by a history-tree row
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkStatus {
    InProgress,
    Completed,
}

/// One branch of a history tree, doubling as its fork record.
///
/// Primary key: (tree_id, branch_id). The ancestor chain persisted here is
/// the authoritative shape of the tree; no in-memory graph exists anywhere.
#[derive(Clone, Debug)]
pub struct HistoryTreeRow {
    pub tree_id: Uuid,
    pub branch_id: Uuid,
    pub ancestors: Vec<BranchAncestor>,
    pub fork_time: SystemTime,
    pub info: String,
    pub status: ForkStatus,
}

/// Filter over the history-tree table
#[derive(Clone, Debug)]
pub struct HistoryTreeFilter {
    pub tree_id: Uuid,
    pub branch_id: Option<Uuid>,
}

/// Write transaction over the events table.
///
/// Exists for the overwrite path: lock the incumbent row, compare
/// concurrency tokens, update, commit. Dropping a transaction without
/// committing discards its writes.
#[async_trait]
pub trait EventStoreTx: Send {
    /// Load the row addressed by the filter under a write lock
    async fn lock_events(&mut self, filter: &EventsFilter) -> Result<EventsRow, DriverError>;

    /// Stage an update of an existing row; returns the number of rows affected
    async fn update_events(&mut self, row: EventsRow) -> Result<usize, DriverError>;

    async fn commit(self: Box<Self>) -> Result<(), DriverError>;

    async fn rollback(self: Box<Self>) -> Result<(), DriverError>;
}

/// Storage driver beneath the history managers
#[async_trait]
pub trait EventStoreDriver: Send + Sync {
    /// Insert a new events row; duplicate primary key is `DuplicateEntry`
    async fn insert_into_events(&self, row: EventsRow) -> Result<(), DriverError>;

    /// Range scan in ascending first_event_id order
    async fn select_from_events(&self, filter: &EventsFilter) -> Result<Vec<EventsRow>, DriverError>;

    /// Remove all rows matching the filter; removing nothing is not an error
    async fn delete_from_events(&self, filter: &EventsFilter) -> Result<(), DriverError>;

    /// Open a write transaction
    async fn begin(&self) -> Result<Box<dyn EventStoreTx>, DriverError>;

    async fn insert_into_history_tree(&self, row: HistoryTreeRow) -> Result<(), DriverError>;

    /// Update an existing tree row; missing row is `NoRows`
    async fn update_history_tree(&self, row: HistoryTreeRow) -> Result<(), DriverError>;

    async fn select_from_history_tree(
        &self,
        filter: &HistoryTreeFilter,
    ) -> Result<Vec<HistoryTreeRow>, DriverError>;

    /// Remove tree rows matching the filter; removing nothing is not an error
    async fn delete_from_history_tree(&self, filter: &HistoryTreeFilter) -> Result<(), DriverError>;
}
