//! 设备内存存储实现

use crate::error::StorageError;
use crate::models::{DeviceFilter, DeviceRecord};
use crate::traits::DeviceStore;
use domain::now_epoch_ms;
use std::collections::HashMap;
use std::sync::RwLock;

/// 设备内存存储
///
/// 使用 RwLock + HashMap 提供线程安全的内存存储。
pub struct InMemoryDeviceStore {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn upsert_device(&self, record: DeviceRecord) -> Result<(), StorageError> {
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        map.insert(record.device_id.clone(), record);
        Ok(())
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StorageError> {
        let item = self
            .devices
            .read()
            .ok()
            .and_then(|map| map.get(device_id).cloned());
        Ok(item)
    }

    async fn find_devices(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>, StorageError> {
        let now = now_epoch_ms();
        let mut items: Vec<DeviceRecord> = self
            .devices
            .read()
            .map(|map| {
                map.values()
                    .filter(|record| filter.matches(record, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(items)
    }

    async fn update_last_contact(&self, device_id: &str, ts_ms: i64) -> Result<(), StorageError> {
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        match map.get_mut(device_id) {
            Some(record) => {
                record.last_contact_ms = ts_ms;
                Ok(())
            }
            None => Err(StorageError::NotFound(device_id.to_string())),
        }
    }

    async fn bump_connreq_failures(&self, device_id: &str) -> Result<(), StorageError> {
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        match map.get_mut(device_id) {
            Some(record) => {
                record.connection_request_failures += 1;
                Ok(())
            }
            None => Err(StorageError::NotFound(device_id.to_string())),
        }
    }

    async fn delete_device(&self, device_id: &str) -> Result<bool, StorageError> {
        let mut map = self
            .devices
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        Ok(map.remove(device_id).is_some())
    }
}
