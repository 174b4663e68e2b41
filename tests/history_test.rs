use std::sync::Arc;

use histree::execution::{EventType, HistoryEvent, WorkflowIdentity, EMPTY_VERSION};
use histree::logging::discard_logger;
use histree::persistence::history::{
    AppendHistoryEventsRequest, GetWorkflowExecutionHistoryRequest, HistoryManager,
};
use histree::persistence::{HistoryError, InMemoryEventStore};
use uuid::Uuid;

fn new_manager() -> HistoryManager {
    HistoryManager::new(Arc::new(InMemoryEventStore::new()), discard_logger())
}

fn new_identity(workflow_id: &str) -> WorkflowIdentity {
    WorkflowIdentity::new(Uuid::new_v4(), workflow_id, Uuid::new_v4())
}

fn batch(event_ids: &[i64], version: i64) -> Vec<HistoryEvent> {
    event_ids
        .iter()
        .map(|id| HistoryEvent::new(*id, version, EventType::Generic("decision".to_string())))
        .collect()
}

async fn append(
    manager: &HistoryManager,
    identity: &WorkflowIdentity,
    batch_version: i64,
    range_id: i64,
    transaction_id: i64,
    events: Vec<HistoryEvent>,
    overwrite: bool,
) -> Result<(), HistoryError> {
    manager
        .append_history_events(&AppendHistoryEventsRequest {
            identity: identity.clone(),
            first_event_id: events[0].event_id,
            event_batch_version: batch_version,
            range_id,
            transaction_id,
            events,
            overwrite,
        })
        .await
        .map(|_| ())
}

async fn read(
    manager: &HistoryManager,
    identity: &WorkflowIdentity,
    first_event_id: i64,
    next_event_id: i64,
    page_size: usize,
    next_page_token: Vec<u8>,
) -> Result<(Vec<HistoryEvent>, Vec<u8>), HistoryError> {
    let response = manager
        .get_workflow_execution_history(&GetWorkflowExecutionHistoryRequest {
            identity: identity.clone(),
            first_event_id,
            next_event_id,
            page_size,
            next_page_token,
        })
        .await?;
    Ok((response.history.events, response.next_page_token))
}

fn assert_event_ids(events: &[HistoryEvent], expected_first: i64, expected_last: i64) {
    let ids: Vec<i64> = events.iter().map(|e| e.event_id).collect();
    let expected: Vec<i64> = (expected_first..=expected_last).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_append_then_read_in_order() {
    let manager = new_manager();
    let identity = new_identity("append-then-read");

    for (tx, events) in [
        batch(&[1, 2], 1),
        batch(&[3], 1),
        batch(&[4, 5], 1),
        batch(&[6, 7], 1),
    ]
    .into_iter()
    .enumerate()
    {
        append(&manager, &identity, EMPTY_VERSION, 1, tx as i64, events, false)
            .await
            .expect("append should succeed");
    }

    let (events, token) = read(&manager, &identity, 1, 8, 11, Vec::new())
        .await
        .expect("read should succeed");
    assert_event_ids(&events, 1, 7);
    assert!(token.is_empty());
}

#[tokio::test]
async fn test_duplicate_append_is_condition_failed_and_overwrite_wins() {
    let manager = new_manager();
    let identity = new_identity("duplicate-append");

    append(&manager, &identity, EMPTY_VERSION, 1, 1, batch(&[1, 2], 1), false)
        .await
        .unwrap();
    append(&manager, &identity, EMPTY_VERSION, 1, 1, batch(&[3], 1), false)
        .await
        .unwrap();

    // same first-event-id, no overwrite
    let err = append(&manager, &identity, EMPTY_VERSION, 1, 1, batch(&[3, 4], 1), false)
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::ConditionFailed(_)));

    // overwrite with a higher transaction id wins
    append(&manager, &identity, EMPTY_VERSION, 1, 2, batch(&[3, 4], 1), true)
        .await
        .expect("overwrite with higher tx id should succeed");

    // overwrite with a stale transaction id loses
    let err = append(&manager, &identity, EMPTY_VERSION, 1, 2, batch(&[3], 1), true)
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::ConditionFailed(_)));

    // overwrite from an older shard epoch loses regardless of tx id
    let err = append(&manager, &identity, EMPTY_VERSION, 0, 9, batch(&[3], 1), true)
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::ConditionFailed(_)));
}

#[tokio::test]
async fn test_read_missing_anchor_is_entity_not_exists() {
    let manager = new_manager();
    let identity = new_identity("missing-anchor");

    append(&manager, &identity, EMPTY_VERSION, 1, 1, batch(&[1, 2], 1), false)
        .await
        .unwrap();

    // no batch starts at event 2
    let err = read(&manager, &identity, 2, 4, 1, Vec::new()).await.unwrap_err();
    assert!(matches!(err, HistoryError::EntityNotExists(_)));

    // unknown execution
    let err = read(&manager, &new_identity("never-written"), 1, 2, 1, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::EntityNotExists(_)));
}

#[tokio::test]
async fn test_token_paged_read_may_end_with_empty_page() {
    let manager = new_manager();
    let identity = new_identity("paged-read");

    append(&manager, &identity, EMPTY_VERSION, 1, 1, batch(&[1, 2], 1), false)
        .await
        .unwrap();

    // page size equals row count, so a token is handed out even though the
    // history is exhausted
    let (events, token) = read(&manager, &identity, 1, 4, 1, Vec::new()).await.unwrap();
    assert_event_ids(&events, 1, 2);
    assert!(!token.is_empty());

    let (events, token) = read(&manager, &identity, 1, 4, 1, token).await.unwrap();
    assert!(events.is_empty());
    assert!(token.is_empty());
}

#[tokio::test]
async fn test_stale_batch_is_skipped() {
    let manager = new_manager();
    let identity = new_identity("stale-batch");

    let batches = [
        batch(&[1, 2], 1),
        batch(&[3], 1),
        batch(&[4, 5, 6], 1),
        batch(&[6], 1), // leftover of an older attempt, superseded by [4,5,6]
        batch(&[7, 8], 1),
    ];
    for (tx, events) in batches.into_iter().enumerate() {
        append(&manager, &identity, EMPTY_VERSION, 1, tx as i64, events, false)
            .await
            .unwrap();
    }

    let mut events = Vec::new();
    let mut token = Vec::new();
    loop {
        let (page, next_token) = read(&manager, &identity, 1, 9, 3, token).await.unwrap();
        events.extend(page);
        token = next_token;
        if token.is_empty() {
            break;
        }
    }
    assert_event_ids(&events, 1, 8);
}

#[tokio::test]
async fn test_overwrite_shadows_older_versions_across_pages() {
    let manager = new_manager();
    let identity = new_identity("shadowed-rewrite");
    let stale_version = 123;
    let rewrite_version = 1234;

    let original = [
        batch(&[1, 2], 1),
        batch(&[3], 1),
        batch(&[4, 5], 1),
        batch(&[6], 1),
        batch(&[7], 1),
        batch(&[8, 9], 1),
        batch(&[10], 1),
        batch(&[11, 12], 1),
        batch(&[13], 1),
        batch(&[14], 1),
    ];
    for (tx, events) in original.into_iter().enumerate() {
        append(&manager, &identity, stale_version, 1, tx as i64, events, false)
            .await
            .unwrap();
    }

    let (events, token) = read(&manager, &identity, 1, 15, 25, Vec::new()).await.unwrap();
    assert_event_ids(&events, 1, 14);
    assert!(token.is_empty());

    // a reset rewrites history from event 8 at a higher version; prefixes
    // that collide with existing rows are overwritten in place
    let rewrite = [
        batch(&[8, 9, 10, 11, 12], 1),
        batch(&[13, 14, 15, 16], 1),
        batch(&[17, 18], 1),
        batch(&[19, 20, 21, 22, 23], 1),
        batch(&[24], 1),
    ];
    for events in rewrite {
        let overwrite = events[0].event_id <= 14;
        append(&manager, &identity, rewrite_version, 1, 999, events, overwrite)
            .await
            .unwrap();
    }

    let mut events = Vec::new();
    let mut token = Vec::new();
    loop {
        let (page, next_token) = read(&manager, &identity, 1, 25, 3, token).await.unwrap();
        events.extend(page);
        token = next_token;
        if token.is_empty() {
            break;
        }
    }
    // stale version-123 copies of events 8..14 never surface
    assert_event_ids(&events, 1, 24);
}

#[tokio::test]
async fn test_read_by_batch_preserves_batch_boundaries() {
    let manager = new_manager();
    let identity = new_identity("read-by-batch");

    let batches = [
        batch(&[1, 2], 1),
        batch(&[3, 4], 1),
        batch(&[5, 6], 1),
        batch(&[7, 8], 1),
    ];
    for (tx, events) in batches.into_iter().enumerate() {
        append(&manager, &identity, EMPTY_VERSION, 1, tx as i64, events, false)
            .await
            .unwrap();

        let next_event_id = (tx as i64 + 1) * 2;
        let response = manager
            .get_workflow_execution_history_by_batch(&GetWorkflowExecutionHistoryRequest {
                identity: identity.clone(),
                first_event_id: 1,
                next_event_id,
                page_size: 11,
                next_page_token: Vec::new(),
            })
            .await
            .unwrap();
        assert!(response.next_page_token.is_empty());
        assert_eq!(response.history.len(), tx + 1);
        for (index, batch) in response.history.iter().enumerate() {
            assert_eq!(batch.events.len(), 2);
            assert_eq!(batch.events[0].event_id, index as i64 * 2 + 1);
        }
    }
}

#[tokio::test]
async fn test_delete_removes_history_and_is_idempotent() {
    let manager = new_manager();
    let identity = new_identity("delete-history");

    for (tx, events) in [batch(&[1, 2], 1), batch(&[3], 1), batch(&[4, 5], 1)]
        .into_iter()
        .enumerate()
    {
        append(&manager, &identity, EMPTY_VERSION, 1, tx as i64, events, false)
            .await
            .unwrap();
    }
    let (events, _) = read(&manager, &identity, 1, 6, 11, Vec::new()).await.unwrap();
    assert_event_ids(&events, 1, 5);

    manager.delete_workflow_execution_history(&identity).await.unwrap();
    let err = read(&manager, &identity, 1, 6, 11, Vec::new()).await.unwrap_err();
    assert!(matches!(err, HistoryError::EntityNotExists(_)));

    // deleting again is not an error
    manager.delete_workflow_execution_history(&identity).await.unwrap();
}
