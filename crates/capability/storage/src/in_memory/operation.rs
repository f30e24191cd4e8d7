//! 操作记录内存存储实现
//!
//! 终态一次性约束在此强制：已离开 {pending, in_progress} 的记录
//! 拒绝任何进一步改写。

use crate::error::StorageError;
use crate::models::{OperationPatch, OperationRecord};
use crate::traits::OperationStore;
use std::collections::HashMap;
use std::sync::RwLock;

/// 操作记录内存存储
pub struct InMemoryOperationStore {
    operations: RwLock<HashMap<String, OperationRecord>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryOperationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn record_operation(&self, record: OperationRecord) -> Result<(), StorageError> {
        let mut map = self
            .operations
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        if map.contains_key(&record.operation_id) {
            return Err(StorageError::Conflict(record.operation_id));
        }
        map.insert(record.operation_id.clone(), record);
        Ok(())
    }

    async fn update_operation(
        &self,
        operation_id: &str,
        patch: OperationPatch,
    ) -> Result<OperationRecord, StorageError> {
        let mut map = self
            .operations
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        let record = map
            .get_mut(operation_id)
            .ok_or_else(|| StorageError::NotFound(operation_id.to_string()))?;
        if record.status.is_terminal() {
            return Err(StorageError::TerminalState(operation_id.to_string()));
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(started_at_ms) = patch.started_at_ms {
            record.started_at_ms = Some(started_at_ms);
        }
        if let Some(completed_at_ms) = patch.completed_at_ms {
            record.completed_at_ms = Some(completed_at_ms);
        }
        if let Some(result) = patch.result {
            record.result = Some(result);
        }
        if let Some(error) = patch.error {
            record.error = Some(error);
        }
        if let Some(retry_count) = patch.retry_count {
            record.retry_count = retry_count;
        }
        Ok(record.clone())
    }

    async fn get_operation(
        &self,
        operation_id: &str,
    ) -> Result<Option<OperationRecord>, StorageError> {
        let item = self
            .operations
            .read()
            .ok()
            .and_then(|map| map.get(operation_id).cloned());
        Ok(item)
    }

    async fn list_operations(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<OperationRecord>, StorageError> {
        let mut items: Vec<OperationRecord> = self
            .operations
            .read()
            .map(|map| {
                map.values()
                    .filter(|record| record.device_id == device_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // 新的在前
        items.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        items.truncate(limit);
        Ok(items)
    }
}
