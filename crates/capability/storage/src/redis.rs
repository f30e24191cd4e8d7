//! Redis 键值缓存实现
//!
//! 幂等键与关联令牌的短时缓存（SET EX / GET）。读方必须容忍 miss。

use crate::error::StorageError;
use crate::traits::CacheStore;
use redis::AsyncCommands;

/// Redis 缓存存储
pub struct RedisCacheStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisCacheStore {
    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            key_prefix: "dms:cache".to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisCacheStore {
    async fn put_cache(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), StorageError> {
        let mut connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        connection
            .set_ex::<_, _, ()>(self.full_key(key), value, ttl_seconds.max(1))
            .await
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Ok(())
    }

    async fn get_cache(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        let value: Option<String> = connection
            .get(self.full_key(key))
            .await
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Ok(value)
    }
}
