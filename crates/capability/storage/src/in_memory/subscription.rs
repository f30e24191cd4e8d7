//! 订阅内存存储实现

use crate::error::StorageError;
use crate::models::SubscriptionRecord;
use crate::traits::SubscriptionStore;
use std::collections::HashMap;
use std::sync::RwLock;

/// 订阅内存存储
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn save_subscription(
        &self,
        record: SubscriptionRecord,
    ) -> Result<SubscriptionRecord, StorageError> {
        let mut map = self
            .subscriptions
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        // 同元组重复创建幂等：返回既有订阅
        if let Some(existing) = map
            .values()
            .find(|item| item.tuple_key() == record.tuple_key())
        {
            return Ok(existing.clone());
        }
        map.insert(record.subscription_id.clone(), record.clone());
        Ok(record)
    }

    async fn list_subscriptions(
        &self,
        device_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<Vec<SubscriptionRecord>, StorageError> {
        let mut items: Vec<SubscriptionRecord> = self
            .subscriptions
            .read()
            .map(|map| {
                map.values()
                    .filter(|record| {
                        device_id.is_none_or(|id| record.device_id.as_deref() == Some(id))
                            && event_type.is_none_or(|et| record.event_type == et)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));
        Ok(items)
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<bool, StorageError> {
        let mut map = self
            .subscriptions
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        Ok(map.remove(subscription_id).is_some())
    }

    async fn touch_delivery(&self, subscription_id: &str, ts_ms: i64) -> Result<(), StorageError> {
        let mut map = self
            .subscriptions
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        match map.get_mut(subscription_id) {
            Some(record) => {
                record.last_delivery_ms = Some(ts_ms);
                Ok(())
            }
            None => Err(StorageError::NotFound(subscription_id.to_string())),
        }
    }
}
