//! In-memory event store driver
//!
//! Reference implementation of the driver contract, used by tests and
//! single-node deployments. A transaction takes exclusive ownership of the
//! whole store for its lifetime, so transactional semantics are trivially
//! serializable.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::persistence::driver::{
    EventStoreDriver, EventStoreTx, EventsFilter, EventsRow, HistoryTreeFilter, HistoryTreeRow,
};
use crate::persistence::error::DriverError;

type EventKey = (Uuid, String, Uuid, i64);
type TreeKey = (Uuid, Uuid);

#[derive(Default)]
struct MemoryState {
    events: BTreeMap<EventKey, EventsRow>,
    trees: BTreeMap<TreeKey, HistoryTreeRow>,
}

fn event_key(row: &EventsRow) -> EventKey {
    (
        row.domain_id,
        row.workflow_id.clone(),
        row.run_id,
        row.first_event_id,
    )
}

/// In-memory implementation of `EventStoreDriver`
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStoreDriver for InMemoryEventStore {
    async fn insert_into_events(&self, row: EventsRow) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        let key = event_key(&row);
        if state.events.contains_key(&key) {
            return Err(DriverError::DuplicateEntry(format!(
                "events row {}/{}/{}/{} already exists",
                key.0, key.1, key.2, key.3
            )));
        }
        state.events.insert(key, row);
        Ok(())
    }

    async fn select_from_events(&self, filter: &EventsFilter) -> Result<Vec<EventsRow>, DriverError> {
        let state = self.state.lock().await;
        let lower = filter.first_event_id.unwrap_or(i64::MIN);
        let upper = filter.next_event_id.unwrap_or(i64::MAX);
        let start: EventKey = (
            filter.domain_id,
            filter.workflow_id.clone(),
            filter.run_id,
            lower,
        );
        let end: EventKey = (
            filter.domain_id,
            filter.workflow_id.clone(),
            filter.run_id,
            upper,
        );
        let mut rows: Vec<EventsRow> = state
            .events
            .range(start..end)
            .map(|(_, row)| row.clone())
            .collect();
        if let Some(page_size) = filter.page_size {
            rows.truncate(page_size);
        }
        Ok(rows)
    }

    async fn delete_from_events(&self, filter: &EventsFilter) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        let lower = filter.first_event_id.unwrap_or(i64::MIN);
        let upper = filter.next_event_id.unwrap_or(i64::MAX);
        let start: EventKey = (
            filter.domain_id,
            filter.workflow_id.clone(),
            filter.run_id,
            lower,
        );
        let end: EventKey = (
            filter.domain_id,
            filter.workflow_id.clone(),
            filter.run_id,
            upper,
        );
        let doomed: Vec<EventKey> = state.events.range(start..end).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            state.events.remove(&key);
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn EventStoreTx>, DriverError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTx {
            guard,
            staged: Vec::new(),
        }))
    }

    async fn insert_into_history_tree(&self, row: HistoryTreeRow) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        let key: TreeKey = (row.tree_id, row.branch_id);
        if state.trees.contains_key(&key) {
            return Err(DriverError::DuplicateEntry(format!(
                "tree row {}/{} already exists",
                key.0, key.1
            )));
        }
        state.trees.insert(key, row);
        Ok(())
    }

    async fn update_history_tree(&self, row: HistoryTreeRow) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        let key: TreeKey = (row.tree_id, row.branch_id);
        match state.trees.get_mut(&key) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(DriverError::NoRows(format!(
                "tree row {}/{} does not exist",
                key.0, key.1
            ))),
        }
    }

    async fn select_from_history_tree(
        &self,
        filter: &HistoryTreeFilter,
    ) -> Result<Vec<HistoryTreeRow>, DriverError> {
        let state = self.state.lock().await;
        let rows = state
            .trees
            .range((filter.tree_id, Uuid::nil())..=(filter.tree_id, Uuid::max()))
            .filter(|((_, branch_id), _)| match filter.branch_id {
                Some(wanted) => *branch_id == wanted,
                None => true,
            })
            .map(|(_, row)| row.clone())
            .collect();
        Ok(rows)
    }

    async fn delete_from_history_tree(&self, filter: &HistoryTreeFilter) -> Result<(), DriverError> {
        let mut state = self.state.lock().await;
        let doomed: Vec<TreeKey> = state
            .trees
            .range((filter.tree_id, Uuid::nil())..=(filter.tree_id, Uuid::max()))
            .filter(|((_, branch_id), _)| match filter.branch_id {
                Some(wanted) => *branch_id == wanted,
                None => true,
            })
            .map(|(key, _)| *key)
            .collect();
        for key in doomed {
            state.trees.remove(&key);
        }
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: Vec<EventsRow>,
}

#[async_trait]
impl EventStoreTx for MemoryTx {
    async fn lock_events(&mut self, filter: &EventsFilter) -> Result<EventsRow, DriverError> {
        let first_event_id = filter
            .first_event_id
            .ok_or_else(|| DriverError::Io("lock requires first_event_id".to_string()))?;
        let key: EventKey = (
            filter.domain_id,
            filter.workflow_id.clone(),
            filter.run_id,
            first_event_id,
        );
        self.guard
            .events
            .get(&key)
            .cloned()
            .ok_or_else(|| DriverError::NoRows(format!("no events row at {}", first_event_id)))
    }

    async fn update_events(&mut self, row: EventsRow) -> Result<usize, DriverError> {
        if !self.guard.events.contains_key(&event_key(&row)) {
            return Ok(0);
        }
        self.staged.push(row);
        Ok(1)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DriverError> {
        let staged = std::mem::take(&mut self.staged);
        for row in staged {
            let key = event_key(&row);
            self.guard.events.insert(key, row);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DriverError> {
        Ok(())
    }
}
