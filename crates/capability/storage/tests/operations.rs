use dms_storage::in_memory::InMemoryOperationStore;
use dms_storage::{OperationPatch, OperationRecord, OperationStatus, OperationStore, StorageError};

fn sample_operation() -> OperationRecord {
    OperationRecord::new("agent-1", "set_parameters", "{}".to_string(), None)
}

#[tokio::test]
async fn status_transitions_are_monotonic() {
    let store = InMemoryOperationStore::new();
    let record = sample_operation();
    let operation_id = record.operation_id.clone();
    store.record_operation(record).await.expect("record");

    store
        .update_operation(
            &operation_id,
            OperationPatch {
                status: Some(OperationStatus::InProgress),
                ..OperationPatch::default()
            },
        )
        .await
        .expect("to in_progress");

    let updated = store
        .update_operation(&operation_id, OperationPatch::finish(OperationStatus::Completed))
        .await
        .expect("to completed");
    assert_eq!(updated.status, OperationStatus::Completed);
    assert!(updated.completed_at_ms.is_some());

    // 终态后任何改写都被拒绝
    let err = store
        .update_operation(&operation_id, OperationPatch::finish(OperationStatus::Failed))
        .await
        .expect_err("terminal refused");
    assert!(matches!(err, StorageError::TerminalState(_)));

    let still = store
        .get_operation(&operation_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(still.status, OperationStatus::Completed);
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let store = InMemoryOperationStore::new();
    let err = store
        .update_operation("missing", OperationPatch::default())
        .await
        .expect_err("missing");
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn list_operations_is_recent_first() {
    let store = InMemoryOperationStore::new();
    let mut first = sample_operation();
    first.created_at_ms = 100;
    let mut second = sample_operation();
    second.created_at_ms = 200;
    store.record_operation(first.clone()).await.expect("record");
    store.record_operation(second.clone()).await.expect("record");

    let items = store.list_operations("agent-1", 10).await.expect("list");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].operation_id, second.operation_id);
}
