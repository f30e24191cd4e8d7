//! 存储接口 Trait 定义
//!
//! 定义所有资源存储的异步接口：
//! - DeviceStore：设备存储
//! - ParameterStore：参数存储
//! - InstanceStore：对象实例存储
//! - OperationStore：操作记录存储
//! - TransferStore：文件传输存储
//! - SubscriptionStore：订阅存储
//! - CacheStore：短时键值缓存
//!
//! 设计原则：
//! - 所有接口返回 StorageError（传输故障 → Unavailable，其余 → 语义错误）
//! - 使用 async_trait 支持动态分发
//! - 网关之上不做任何协议判断

use crate::error::StorageError;
use crate::models::{
    DeviceFilter, DeviceRecord, InstanceRecord, OperationPatch, OperationRecord, ParameterRecord,
    SubscriptionRecord, TransferRecord,
};
use async_trait::async_trait;
use domain::PathPattern;

/// 设备存储接口。
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 按规范化 ID 原子插入或整体替换
    async fn upsert_device(&self, record: DeviceRecord) -> Result<(), StorageError>;

    /// 查找设备
    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StorageError>;

    /// 条件查询（各条件取合取）
    async fn find_devices(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>, StorageError>;

    /// 更新活性时间戳
    async fn update_last_contact(&self, device_id: &str, ts_ms: i64) -> Result<(), StorageError>;

    /// 累加连接请求失败计数
    async fn bump_connreq_failures(&self, device_id: &str) -> Result<(), StorageError>;

    /// 删除设备（参数与实例由调用方级联清理）
    async fn delete_device(&self, device_id: &str) -> Result<bool, StorageError>;
}

/// 参数存储接口。
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// 批量插入或更新；单次调用保证全量成功或全量失败
    async fn upsert_parameters(
        &self,
        device_id: &str,
        parameters: &[ParameterRecord],
    ) -> Result<(), StorageError>;

    /// 按模式取参数，按路径排序
    async fn get_parameters(
        &self,
        device_id: &str,
        pattern: &PathPattern,
    ) -> Result<Vec<ParameterRecord>, StorageError>;

    /// 取单个参数
    async fn get_parameter(
        &self,
        device_id: &str,
        path: &str,
    ) -> Result<Option<ParameterRecord>, StorageError>;

    /// 删除指定前缀下的全部参数（实例删除时级联）
    async fn delete_parameters_by_prefix(
        &self,
        device_id: &str,
        prefix: &str,
    ) -> Result<u64, StorageError>;

    /// 删除设备全部参数
    async fn delete_parameters(&self, device_id: &str) -> Result<u64, StorageError>;
}

/// 对象实例存储接口。
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// 登记新实例；(device, object_path, instance) 冲突返回 Conflict
    async fn create_instance(&self, record: InstanceRecord) -> Result<(), StorageError>;

    /// 删除实例
    async fn delete_instance(
        &self,
        device_id: &str,
        object_path: &str,
        instance_number: u32,
    ) -> Result<bool, StorageError>;

    /// 列出对象的全部实例
    async fn list_instances(
        &self,
        device_id: &str,
        object_path: &str,
    ) -> Result<Vec<InstanceRecord>, StorageError>;
}

/// 操作记录存储接口。
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// 登记新操作
    async fn record_operation(&self, record: OperationRecord) -> Result<(), StorageError>;

    /// 过渡态更新；目标操作已处终态时拒绝（TerminalState）
    async fn update_operation(
        &self,
        operation_id: &str,
        patch: OperationPatch,
    ) -> Result<OperationRecord, StorageError>;

    /// 查找操作
    async fn get_operation(
        &self,
        operation_id: &str,
    ) -> Result<Option<OperationRecord>, StorageError>;

    /// 按设备列出最近操作
    async fn list_operations(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<OperationRecord>, StorageError>;
}

/// 文件传输存储接口。
#[async_trait]
pub trait TransferStore: Send + Sync {
    async fn create_transfer(&self, record: TransferRecord) -> Result<(), StorageError>;

    /// 按 (device, command_key) 关联查找
    async fn find_transfer(
        &self,
        device_id: &str,
        command_key: &str,
    ) -> Result<Option<TransferRecord>, StorageError>;

    /// 状态流转；已终态（completed/failed）的记录拒绝改写
    async fn update_transfer_status(
        &self,
        device_id: &str,
        command_key: &str,
        status: &str,
        fault: Option<String>,
        completed_at_ms: Option<i64>,
    ) -> Result<(), StorageError>;

    async fn list_transfers(&self, device_id: &str) -> Result<Vec<TransferRecord>, StorageError>;
}

/// 订阅存储接口。
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// 保存订阅；同元组已存在时返回既有记录（幂等）
    async fn save_subscription(
        &self,
        record: SubscriptionRecord,
    ) -> Result<SubscriptionRecord, StorageError>;

    /// 列出订阅；device_id 传 None 取全部，event_type 同理
    async fn list_subscriptions(
        &self,
        device_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<Vec<SubscriptionRecord>, StorageError>;

    async fn delete_subscription(&self, subscription_id: &str) -> Result<bool, StorageError>;

    /// 刷新最近投递时间
    async fn touch_delivery(&self, subscription_id: &str, ts_ms: i64) -> Result<(), StorageError>;
}

/// 短时键值缓存接口（幂等键、关联令牌）。读方必须容忍 miss。
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn put_cache(&self, key: &str, value: &str, ttl_seconds: u64)
        -> Result<(), StorageError>;

    async fn get_cache(&self, key: &str) -> Result<Option<String>, StorageError>;
}
