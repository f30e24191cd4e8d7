//! 文件传输内存存储实现

use crate::error::StorageError;
use crate::models::TransferRecord;
use crate::traits::TransferStore;
use std::collections::HashMap;
use std::sync::RwLock;

fn transfer_key(device_id: &str, command_key: &str) -> String {
    format!("{}\u{1}{}", device_id, command_key)
}

fn is_terminal(status: &str) -> bool {
    matches!(status, "completed" | "failed")
}

/// 文件传输内存存储
pub struct InMemoryTransferStore {
    transfers: RwLock<HashMap<String, TransferRecord>>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTransferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn create_transfer(&self, record: TransferRecord) -> Result<(), StorageError> {
        let mut map = self
            .transfers
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        let key = transfer_key(&record.device_id, &record.command_key);
        if map.contains_key(&key) {
            return Err(StorageError::Conflict(record.command_key));
        }
        map.insert(key, record);
        Ok(())
    }

    async fn find_transfer(
        &self,
        device_id: &str,
        command_key: &str,
    ) -> Result<Option<TransferRecord>, StorageError> {
        let item = self
            .transfers
            .read()
            .ok()
            .and_then(|map| map.get(&transfer_key(device_id, command_key)).cloned());
        Ok(item)
    }

    async fn update_transfer_status(
        &self,
        device_id: &str,
        command_key: &str,
        status: &str,
        fault: Option<String>,
        completed_at_ms: Option<i64>,
    ) -> Result<(), StorageError> {
        let mut map = self
            .transfers
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        let record = map
            .get_mut(&transfer_key(device_id, command_key))
            .ok_or_else(|| StorageError::NotFound(command_key.to_string()))?;
        if is_terminal(&record.status) {
            return Err(StorageError::TerminalState(command_key.to_string()));
        }
        record.status = status.to_string();
        if fault.is_some() {
            record.fault = fault;
        }
        if completed_at_ms.is_some() {
            record.completed_at_ms = completed_at_ms;
        }
        Ok(())
    }

    async fn list_transfers(&self, device_id: &str) -> Result<Vec<TransferRecord>, StorageError> {
        let mut items: Vec<TransferRecord> = self
            .transfers
            .read()
            .map(|map| {
                map.values()
                    .filter(|record| record.device_id == device_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| a.command_key.cmp(&b.command_key));
        Ok(items)
    }
}
