//! 参数与对象实例内存存储实现

use crate::error::StorageError;
use crate::models::{InstanceRecord, ParameterRecord};
use crate::traits::{InstanceStore, ParameterStore};
use domain::PathPattern;
use std::collections::HashMap;
use std::sync::RwLock;

/// 参数内存存储
///
/// 外层键为设备 ID，内层键为参数路径，保证 (device_id, path) 唯一。
pub struct InMemoryParameterStore {
    parameters: RwLock<HashMap<String, HashMap<String, ParameterRecord>>>,
}

impl InMemoryParameterStore {
    pub fn new() -> Self {
        Self {
            parameters: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ParameterStore for InMemoryParameterStore {
    async fn upsert_parameters(
        &self,
        device_id: &str,
        parameters: &[ParameterRecord],
    ) -> Result<(), StorageError> {
        // 单把写锁覆盖整批，天然满足 all-or-nothing
        let mut map = self
            .parameters
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        let device_map = map.entry(device_id.to_string()).or_default();
        for parameter in parameters {
            device_map.insert(parameter.path.clone(), parameter.clone());
        }
        Ok(())
    }

    async fn get_parameters(
        &self,
        device_id: &str,
        pattern: &PathPattern,
    ) -> Result<Vec<ParameterRecord>, StorageError> {
        let mut items: Vec<ParameterRecord> = self
            .parameters
            .read()
            .map(|map| {
                map.get(device_id)
                    .map(|device_map| {
                        device_map
                            .values()
                            .filter(|record| pattern.matches(&record.path))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(items)
    }

    async fn get_parameter(
        &self,
        device_id: &str,
        path: &str,
    ) -> Result<Option<ParameterRecord>, StorageError> {
        let item = self
            .parameters
            .read()
            .ok()
            .and_then(|map| map.get(device_id).and_then(|m| m.get(path).cloned()));
        Ok(item)
    }

    async fn delete_parameters_by_prefix(
        &self,
        device_id: &str,
        prefix: &str,
    ) -> Result<u64, StorageError> {
        let mut map = self
            .parameters
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        let Some(device_map) = map.get_mut(device_id) else {
            return Ok(0);
        };
        let before = device_map.len();
        device_map.retain(|path, _| !path.starts_with(prefix));
        Ok((before - device_map.len()) as u64)
    }

    async fn delete_parameters(&self, device_id: &str) -> Result<u64, StorageError> {
        let mut map = self
            .parameters
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        Ok(map
            .remove(device_id)
            .map(|device_map| device_map.len() as u64)
            .unwrap_or(0))
    }
}

/// 对象实例内存存储
pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<String, Vec<InstanceRecord>>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryInstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create_instance(&self, record: InstanceRecord) -> Result<(), StorageError> {
        let mut map = self
            .instances
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        let list = map.entry(record.device_id.clone()).or_default();
        let exists = list.iter().any(|item| {
            item.object_path == record.object_path && item.instance_number == record.instance_number
        });
        if exists {
            return Err(StorageError::Conflict(format!(
                "instance {}{} exists",
                record.object_path, record.instance_number
            )));
        }
        list.push(record);
        Ok(())
    }

    async fn delete_instance(
        &self,
        device_id: &str,
        object_path: &str,
        instance_number: u32,
    ) -> Result<bool, StorageError> {
        let mut map = self
            .instances
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        let Some(list) = map.get_mut(device_id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|item| {
            !(item.object_path == object_path && item.instance_number == instance_number)
        });
        Ok(list.len() < before)
    }

    async fn list_instances(
        &self,
        device_id: &str,
        object_path: &str,
    ) -> Result<Vec<InstanceRecord>, StorageError> {
        let mut items: Vec<InstanceRecord> = self
            .instances
            .read()
            .map(|map| {
                map.get(device_id)
                    .map(|list| {
                        list.iter()
                            .filter(|item| item.object_path == object_path)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        items.sort_by_key(|item| item.instance_number);
        Ok(items)
    }
}
