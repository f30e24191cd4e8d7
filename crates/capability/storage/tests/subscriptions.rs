use dms_storage::in_memory::{InMemoryCacheStore, InMemorySubscriptionStore};
use dms_storage::{CacheStore, SubscriptionRecord, SubscriptionStore};
use domain::now_epoch_ms;

fn sample_subscription(device_id: Option<&str>) -> SubscriptionRecord {
    SubscriptionRecord {
        subscription_id: uuid::Uuid::new_v4().to_string(),
        device_id: device_id.map(|id| id.to_string()),
        event_type: "value_change".to_string(),
        path_pattern: "Device.WiFi.Radio.*.Channel".to_string(),
        delivery_target: "ops-queue".to_string(),
        status: "active".to_string(),
        created_at_ms: now_epoch_ms(),
        last_delivery_ms: None,
    }
}

#[tokio::test]
async fn duplicate_tuple_is_idempotent() {
    let store = InMemorySubscriptionStore::new();
    let first = store
        .save_subscription(sample_subscription(Some("agent-1")))
        .await
        .expect("save");
    let second = store
        .save_subscription(sample_subscription(Some("agent-1")))
        .await
        .expect("save again");
    assert_eq!(first.subscription_id, second.subscription_id);
}

#[tokio::test]
async fn list_filters_by_device_and_event() {
    let store = InMemorySubscriptionStore::new();
    store
        .save_subscription(sample_subscription(Some("agent-1")))
        .await
        .expect("save");
    store
        .save_subscription(sample_subscription(None))
        .await
        .expect("save wildcard");

    let scoped = store
        .list_subscriptions(Some("agent-1"), Some("value_change"))
        .await
        .expect("list");
    assert_eq!(scoped.len(), 1);

    let all = store.list_subscriptions(None, None).await.expect("list all");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn cache_expires_and_tolerates_miss() {
    let cache = InMemoryCacheStore::new();
    assert!(cache.get_cache("absent").await.expect("miss ok").is_none());

    cache.put_cache("op-key", "op-1", 60).await.expect("put");
    assert_eq!(
        cache.get_cache("op-key").await.expect("hit").as_deref(),
        Some("op-1")
    );
}
