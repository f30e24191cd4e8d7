//! 订阅路由。
//!
//! 维护 (设备, 事件类型, 路径模式) → 订阅 的查询，并把命中的
//! 事件投递到进程内通道（外部投递不在本层范围）。两侧引擎共用：
//! USP 的 Notify 与 CWMP 的 value change / transfer complete /
//! boot 事件都经由这里扇出。

use dms_storage::{StorageError, SubscriptionRecord, SubscriptionStore};
use domain::{now_epoch_ms, PathPattern};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// 事件类型常量（订阅记录里的 event_type 取值）。
pub mod event_types {
    pub const VALUE_CHANGE: &str = "value_change";
    pub const EVENT: &str = "event";
    pub const OPERATION_COMPLETE: &str = "operation_complete";
    pub const ON_BOARD: &str = "on_board";
    pub const TRANSFER_COMPLETE: &str = "transfer_complete";
    pub const BOOT: &str = "boot";
}

/// 投递任务：命中的订阅 + 事件内容。
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub subscription_id: String,
    pub delivery_target: String,
    pub device_id: String,
    pub event_type: String,
    pub path: String,
    pub payload: serde_json::Value,
    pub ts_ms: i64,
}

/// 订阅路由器。
pub struct SubscriptionRouter {
    store: Arc<dyn SubscriptionStore>,
    deliveries: mpsc::Sender<DeliveryTask>,
}

impl SubscriptionRouter {
    /// 构造路由器并返回投递接收端。
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        queue_cap: usize,
    ) -> (Self, mpsc::Receiver<DeliveryTask>) {
        let (deliveries, receiver) = mpsc::channel(queue_cap.max(1));
        (Self { store, deliveries }, receiver)
    }

    /// 保存订阅（同元组幂等）。
    pub async fn subscribe(
        &self,
        record: SubscriptionRecord,
    ) -> Result<SubscriptionRecord, StorageError> {
        self.store.save_subscription(record).await
    }

    /// 路由一个事件：按设备专属 + 全局订阅匹配，逐个入队投递任务。
    ///
    /// 返回入队的投递任务数。投递队列满时丢弃并计数，不回压事件源。
    pub async fn route(
        &self,
        device_id: &str,
        event_type: &str,
        path: &str,
        payload: serde_json::Value,
    ) -> usize {
        let mut candidates = match self.store.list_subscriptions(Some(device_id), Some(event_type)).await
        {
            Ok(items) => items,
            Err(err) => {
                warn!(target: "dms.usp", error = %err, "subscription lookup failed");
                Vec::new()
            }
        };
        match self.store.list_subscriptions(None, Some(event_type)).await {
            Ok(items) => {
                candidates.extend(items.into_iter().filter(|item| item.device_id.is_none()));
            }
            Err(err) => {
                warn!(target: "dms.usp", error = %err, "subscription lookup failed");
            }
        }

        let ts_ms = now_epoch_ms();
        let mut delivered = 0;
        for subscription in candidates {
            if subscription.status != "active" {
                continue;
            }
            let matched = PathPattern::parse(&subscription.path_pattern)
                .map(|pattern| pattern.matches(path))
                .unwrap_or(false);
            if !matched {
                continue;
            }
            let task = DeliveryTask {
                subscription_id: subscription.subscription_id.clone(),
                delivery_target: subscription.delivery_target.clone(),
                device_id: device_id.to_string(),
                event_type: event_type.to_string(),
                path: path.to_string(),
                payload: payload.clone(),
                ts_ms,
            };
            match self.deliveries.try_send(task) {
                Ok(()) => {
                    delivered += 1;
                    dms_telemetry::record_notify_delivered();
                    let _ = self
                        .store
                        .touch_delivery(&subscription.subscription_id, ts_ms)
                        .await;
                }
                Err(_) => {
                    dms_telemetry::record_dropped_event();
                }
            }
        }
        if delivered == 0 {
            dms_telemetry::record_notify_unmatched();
        }
        delivered
    }

    /// 参数变更事件的负载格式。
    pub fn value_change_payload(param_path: &str, param_value: &str) -> serde_json::Value {
        json!({
            "path": param_path,
            "value": param_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms_storage::in_memory::InMemorySubscriptionStore;

    fn subscription(device_id: Option<&str>, pattern: &str) -> SubscriptionRecord {
        SubscriptionRecord {
            subscription_id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.map(|id| id.to_string()),
            event_type: event_types::VALUE_CHANGE.to_string(),
            path_pattern: pattern.to_string(),
            delivery_target: "ops-queue".to_string(),
            status: "active".to_string(),
            created_at_ms: now_epoch_ms(),
            last_delivery_ms: None,
        }
    }

    #[tokio::test]
    async fn routes_exactly_one_delivery_per_matching_subscription() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let (router, mut deliveries) = SubscriptionRouter::new(store, 16);
        router
            .subscribe(subscription(Some("agent-1"), "Device.WiFi.Radio.*.Channel"))
            .await
            .expect("subscribe");

        let delivered = router
            .route(
                "agent-1",
                event_types::VALUE_CHANGE,
                "Device.WiFi.Radio.1.Channel",
                SubscriptionRouter::value_change_payload("Device.WiFi.Radio.1.Channel", "6"),
            )
            .await;
        assert_eq!(delivered, 1);

        let task = deliveries.recv().await.expect("delivery");
        assert_eq!(task.delivery_target, "ops-queue");
        assert_eq!(task.path, "Device.WiFi.Radio.1.Channel");
        // 队列里只有一条
        assert!(deliveries.try_recv().is_err());
    }

    #[tokio::test]
    async fn wildcard_device_subscription_matches_all_devices() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let (router, mut deliveries) = SubscriptionRouter::new(store, 16);
        router
            .subscribe(subscription(None, "Device.WiFi.Radio.*.Channel"))
            .await
            .expect("subscribe");

        let delivered = router
            .route(
                "agent-7",
                event_types::VALUE_CHANGE,
                "Device.WiFi.Radio.2.Channel",
                serde_json::json!({}),
            )
            .await;
        assert_eq!(delivered, 1);
        assert!(deliveries.recv().await.is_some());
    }

    #[tokio::test]
    async fn non_matching_path_is_not_delivered() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let (router, mut deliveries) = SubscriptionRouter::new(store, 16);
        router
            .subscribe(subscription(Some("agent-1"), "Device.WiFi.Radio.*.Channel"))
            .await
            .expect("subscribe");

        let delivered = router
            .route(
                "agent-1",
                event_types::VALUE_CHANGE,
                "Device.WiFi.Radio.1.Enable",
                serde_json::json!({}),
            )
            .await;
        assert_eq!(delivered, 0);
        assert!(deliveries.try_recv().is_err());
    }
}
