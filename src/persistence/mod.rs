//! Durable workflow history: blob-store driver seam, the legacy linear
//! manager, and the branching tree manager with its deletion protocol.

pub mod branch;
pub mod driver;
pub mod error;
pub mod history;
pub mod memory;
pub mod page;
pub mod tree;
pub mod treeutil;

pub use branch::{new_history_branch_token_from_another, BranchAncestor, HistoryBranch};
pub use driver::{
    EventStoreDriver, EventStoreTx, EventsFilter, EventsRow, ForkStatus, HistoryTreeFilter,
    HistoryTreeRow,
};
pub use error::{DriverError, HistoryError};
pub use history::{
    AppendHistoryEventsRequest, GetWorkflowExecutionHistoryRequest, HistoryManager,
};
pub use memory::InMemoryEventStore;
pub use tree::{
    AppendHistoryNodesRequest, CompleteForkBranchRequest, ForkHistoryBranchRequest,
    HistoryTreeManager, ReadHistoryBranchRequest,
};
pub use treeutil::{
    delete_workflow_execution_history_v2, read_full_page_events, read_full_page_events_by_batch,
    FORK_ABANDON_THRESHOLD,
};
