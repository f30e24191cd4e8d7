//! 键值缓存内存实现
//!
//! 带 TTL 的尽力而为缓存，过期键在读取时惰性清除。

use crate::error::StorageError;
use crate::traits::CacheStore;
use domain::now_epoch_ms;
use std::collections::HashMap;
use std::sync::RwLock;

/// 键值缓存内存实现
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, (String, i64)>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn put_cache(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), StorageError> {
        let expires_at_ms = now_epoch_ms() + (ttl_seconds as i64) * 1_000;
        let mut map = self
            .entries
            .write()
            .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
        map.insert(key.to_string(), (value.to_string(), expires_at_ms));
        Ok(())
    }

    async fn get_cache(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = now_epoch_ms();
        let expired = {
            let map = self
                .entries
                .read()
                .map_err(|_| StorageError::Unavailable("lock failed".to_string()))?;
            match map.get(key) {
                Some((value, expires_at_ms)) if *expires_at_ms > now => {
                    return Ok(Some(value.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            if let Ok(mut map) = self.entries.write() {
                map.remove(key);
            }
        }
        Ok(None)
    }
}
