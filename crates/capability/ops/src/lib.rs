//! 操作门面。
//!
//! 对 REST 层暴露统一操作集（getParameters / setParameters /
//! addObject / deleteObject / operate / scheduleFileTransfer /
//! subscribe），按目标设备的协议类别分派到 USP 或 CWMP 引擎。
//! 每次调用都会留下一条操作记录（终态一次性），幂等键经缓存
//! 在配置窗口内合并重试。

pub mod cwmp;
pub mod error;
pub mod usp;

pub use cwmp::CwmpDeviceEngine;
pub use error::{ErrorKind, OpsError};
pub use usp::UspDeviceEngine;

use async_trait::async_trait;
use dms_pipeline::PersistSink;
use dms_registry::DeviceRegistry;
use dms_storage::{
    CacheStore, OperationPatch, OperationRecord, OperationStatus, OperationStore, ParameterRecord,
    SubscriptionRecord, TransferRecord, TransferStore,
};
use dms_usp::SubscriptionRouter;
use domain::{now_epoch_ms, DeviceKind, ParamType, PathPattern};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// 单条参数写入项。
#[derive(Debug, Clone)]
pub struct SetItem {
    pub path: String,
    pub value: String,
    pub param_type: ParamType,
}

/// 单路径写入结果。
#[derive(Debug, Clone)]
pub struct SetResult {
    pub path: String,
    pub ok: bool,
    pub failure: Option<OpsError>,
}

/// 文件传输调度参数。
#[derive(Debug, Clone)]
pub struct TransferSpec {
    /// download | upload
    pub direction: String,
    pub url: String,
    pub file_type: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub delay_seconds: u32,
    pub command_key: String,
    pub target_file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// 协议引擎能力集：两侧引擎各自实现，操作员代码里没有按协议的分支。
#[async_trait]
pub trait DeviceEngine: Send + Sync {
    async fn get_params(
        &self,
        device_id: &str,
        patterns: &[PathPattern],
        timeout: Duration,
    ) -> Result<Vec<ParameterRecord>, OpsError>;

    async fn set_params(
        &self,
        device_id: &str,
        items: &[SetItem],
        atomic: bool,
        timeout: Duration,
    ) -> Result<Vec<SetResult>, OpsError>;

    async fn add_object(
        &self,
        device_id: &str,
        object_path: &str,
        seed: &[SetItem],
        timeout: Duration,
    ) -> Result<u32, OpsError>;

    async fn delete_object(
        &self,
        device_id: &str,
        instance_path: &str,
        timeout: Duration,
    ) -> Result<(), OpsError>;

    async fn operate(
        &self,
        device_id: &str,
        command: &str,
        args: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, OpsError>;

    async fn schedule_transfer(
        &self,
        device_id: &str,
        transfer: &TransferRecord,
        timeout: Duration,
    ) -> Result<(), OpsError>;

    /// 数据模型发现：路径 + 可写性（USP 走 GetSupportedDM，
    /// CWMP 走 GetParameterNames，并据此刷新存储里的 Writable 标记）
    async fn discover(
        &self,
        device_id: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<ParamInfo>, OpsError>;

    /// 列出对象的现存实例路径（USP 走 GetInstances，CWMP 取本地实例表）
    async fn instances(
        &self,
        device_id: &str,
        object_path: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, OpsError>;

    /// 引擎能否立刻把请求推到设备（USP 能；CWMP 只能排队等拉取）
    fn supports_immediate(&self) -> bool;
}

/// 发现结果项。
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub path: String,
    pub writable: bool,
}

/// 门面配置。
#[derive(Debug, Clone)]
pub struct OpsConfig {
    pub default_timeout: Duration,
    pub idempotency_ttl_seconds: u64,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            idempotency_ttl_seconds: 300,
        }
    }
}

/// 幂等重放用的落库结果形状。
#[derive(Debug, Serialize, Deserialize)]
struct StoredSetResult {
    path: String,
    ok: bool,
    message: Option<String>,
}

/// 操作门面。进程级单例。
pub struct OpsService {
    registry: Arc<DeviceRegistry>,
    usp_engine: Arc<dyn DeviceEngine>,
    cwmp_engine: Arc<dyn DeviceEngine>,
    operations: Arc<dyn OperationStore>,
    transfers: Arc<dyn TransferStore>,
    cache: Arc<dyn CacheStore>,
    router: Arc<SubscriptionRouter>,
    sink: PersistSink,
    config: OpsConfig,
}

impl OpsService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        usp_engine: Arc<dyn DeviceEngine>,
        cwmp_engine: Arc<dyn DeviceEngine>,
        operations: Arc<dyn OperationStore>,
        transfers: Arc<dyn TransferStore>,
        cache: Arc<dyn CacheStore>,
        router: Arc<SubscriptionRouter>,
        sink: PersistSink,
        config: OpsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            usp_engine,
            cwmp_engine,
            operations,
            transfers,
            cache,
            router,
            sink,
            config,
        })
    }

    /// 持久化工作池饱和时对新请求施加背压（入站事件不受此限）。
    fn admit(&self) -> Result<(), OpsError> {
        if self.sink.has_capacity() {
            Ok(())
        } else {
            dms_telemetry::record_pushback();
            Err(OpsError::pushback())
        }
    }

    /// 按设备类别选引擎；未注册设备在触碰传输层前就失败。
    fn engine_for(&self, device_id: &str) -> Result<&Arc<dyn DeviceEngine>, OpsError> {
        let device = self
            .registry
            .get(device_id)
            .map_err(|_| OpsError::device_unknown(device_id))?;
        Ok(match device.kind() {
            DeviceKind::Usp => &self.usp_engine,
            DeviceKind::Cwmp => &self.cwmp_engine,
        })
    }

    fn timeout_of(&self, timeout_ms: Option<u64>) -> Duration {
        timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout)
    }

    /// 登记一条操作并转入 in_progress。
    async fn begin(
        &self,
        device_id: &str,
        kind: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> Result<String, OpsError> {
        let record = OperationRecord::new(
            device_id,
            kind,
            payload.to_string(),
            Some(now_epoch_ms() + timeout.as_millis() as i64),
        );
        let operation_id = record.operation_id.clone();
        self.operations.record_operation(record).await?;
        self.operations
            .update_operation(
                &operation_id,
                OperationPatch {
                    status: Some(OperationStatus::InProgress),
                    started_at_ms: Some(now_epoch_ms()),
                    ..OperationPatch::default()
                },
            )
            .await?;
        Ok(operation_id)
    }

    async fn finish_ok(&self, operation_id: &str, result: serde_json::Value) {
        let patch = OperationPatch {
            result: Some(result.to_string()),
            ..OperationPatch::finish(OperationStatus::Completed)
        };
        if let Err(err) = self.operations.update_operation(operation_id, patch).await {
            warn!(target: "dms.ops", operation_id = %operation_id, error = %err, "operation finish failed");
        }
    }

    async fn finish_err(&self, operation_id: &str, error: &OpsError) {
        let status = if error.is_timeout() {
            OperationStatus::Timeout
        } else {
            OperationStatus::Failed
        };
        let patch = OperationPatch {
            error: Some(serde_json::json!(error.to_dto()).to_string()),
            ..OperationPatch::finish(status)
        };
        if let Err(err) = self.operations.update_operation(operation_id, patch).await {
            warn!(target: "dms.ops", operation_id = %operation_id, error = %err, "operation finish failed");
        }
    }

    /// getParameters(deviceId, PathPattern[], timeout) → Parameter[]。
    pub async fn get_parameters(
        &self,
        device_id: &str,
        patterns: &[String],
        timeout_ms: Option<u64>,
    ) -> Result<Vec<ParameterRecord>, OpsError> {
        let parsed = parse_patterns(patterns)?;
        let engine = self.engine_for(device_id)?;
        self.admit()?;
        let timeout = self.timeout_of(timeout_ms);
        let operation_id = self
            .begin(
                device_id,
                "get_parameters",
                serde_json::json!({ "patterns": patterns }),
                timeout,
            )
            .await?;
        match engine.get_params(device_id, &parsed, timeout).await {
            Ok(records) => {
                self.finish_ok(&operation_id, serde_json::json!({ "count": records.len() }))
                    .await;
                Ok(records)
            }
            Err(err) => {
                self.finish_err(&operation_id, &err).await;
                Err(err)
            }
        }
    }

    /// setParameters：幂等键窗口内的重放直接取上次结果，不再触碰设备。
    pub async fn set_parameters(
        &self,
        device_id: &str,
        items: Vec<SetItem>,
        atomic: bool,
        idempotency_key: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<SetResult>, OpsError> {
        for item in &items {
            PathPattern::parse(&item.path)
                .map_err(|err| OpsError::invalid_path(&item.path, err.to_string()))?;
        }
        let cache_key = idempotency_key
            .as_deref()
            .map(|key| format!("idem:set:{}:{}", device_id, key));

        // 重放检测
        if let Some(cache_key) = &cache_key {
            if let Ok(Some(operation_id)) = self.cache.get_cache(cache_key).await {
                return self.replay_set(&operation_id, device_id).await;
            }
        }

        let engine = self.engine_for(device_id)?;
        self.admit()?;
        if !engine.supports_immediate() {
            tracing::debug!(target: "dms.ops", device_id = %device_id, "set queued for next session");
        }
        let timeout = self.timeout_of(timeout_ms);
        let operation_id = self
            .begin(
                device_id,
                "set_parameters",
                serde_json::json!({
                    "paths": items.iter().map(|item| item.path.clone()).collect::<Vec<_>>(),
                    "atomic": atomic,
                }),
                timeout,
            )
            .await?;
        if let Some(cache_key) = &cache_key {
            if let Err(err) = self
                .cache
                .put_cache(cache_key, &operation_id, self.config.idempotency_ttl_seconds)
                .await
            {
                warn!(target: "dms.ops", error = %err, "idempotency cache write failed");
            }
        }

        match engine.set_params(device_id, &items, atomic, timeout).await {
            Ok(results) => {
                let stored: Vec<StoredSetResult> = results
                    .iter()
                    .map(|result| StoredSetResult {
                        path: result.path.clone(),
                        ok: result.ok,
                        message: result.failure.as_ref().map(|failure| failure.message.clone()),
                    })
                    .collect();
                self.finish_ok(&operation_id, serde_json::json!(stored)).await;
                Ok(results)
            }
            Err(err) => {
                self.finish_err(&operation_id, &err).await;
                Err(err)
            }
        }
    }

    /// 幂等重放：读回已落库的结果。
    async fn replay_set(
        &self,
        operation_id: &str,
        device_id: &str,
    ) -> Result<Vec<SetResult>, OpsError> {
        let Some(record) = self.operations.get_operation(operation_id).await? else {
            return Err(OpsError::new(ErrorKind::Control, "duplicate request in flight")
                .with_device(device_id));
        };
        match record.status {
            OperationStatus::Completed => {
                let stored: Vec<StoredSetResult> = record
                    .result
                    .as_deref()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();
                Ok(stored
                    .into_iter()
                    .map(|item| SetResult {
                        path: item.path.clone(),
                        ok: item.ok,
                        failure: item.message.map(|message| {
                            OpsError::new(ErrorKind::Semantic, message).with_path(item.path)
                        }),
                    })
                    .collect())
            }
            OperationStatus::Pending | OperationStatus::InProgress => {
                Err(OpsError::new(ErrorKind::Control, "duplicate request in flight")
                    .with_device(device_id))
            }
            _ => Err(OpsError::new(
                ErrorKind::Control,
                format!("prior attempt ended as {}", record.status),
            )
            .with_device(device_id)),
        }
    }

    /// addObject → 新实例号。
    pub async fn add_object(
        &self,
        device_id: &str,
        object_path: &str,
        seed: Vec<SetItem>,
        timeout_ms: Option<u64>,
    ) -> Result<u32, OpsError> {
        let engine = self.engine_for(device_id)?;
        self.admit()?;
        let timeout = self.timeout_of(timeout_ms);
        let operation_id = self
            .begin(
                device_id,
                "add_object",
                serde_json::json!({ "objectPath": object_path }),
                timeout,
            )
            .await?;
        match engine.add_object(device_id, object_path, &seed, timeout).await {
            Ok(instance_number) => {
                self.finish_ok(
                    &operation_id,
                    serde_json::json!({ "instanceNumber": instance_number }),
                )
                .await;
                Ok(instance_number)
            }
            Err(err) => {
                self.finish_err(&operation_id, &err).await;
                Err(err)
            }
        }
    }

    /// deleteObject。
    pub async fn delete_object(
        &self,
        device_id: &str,
        instance_path: &str,
        timeout_ms: Option<u64>,
    ) -> Result<(), OpsError> {
        let engine = self.engine_for(device_id)?;
        self.admit()?;
        let timeout = self.timeout_of(timeout_ms);
        let operation_id = self
            .begin(
                device_id,
                "delete_object",
                serde_json::json!({ "instancePath": instance_path }),
                timeout,
            )
            .await?;
        match engine.delete_object(device_id, instance_path, timeout).await {
            Ok(()) => {
                self.finish_ok(&operation_id, serde_json::json!({ "deleted": true })).await;
                Ok(())
            }
            Err(err) => {
                self.finish_err(&operation_id, &err).await;
                Err(err)
            }
        }
    }

    /// operate：命令空间即设备数据模型（如 `Device.Reboot()`）。
    pub async fn operate(
        &self,
        device_id: &str,
        command: &str,
        args: serde_json::Value,
        timeout_ms: Option<u64>,
    ) -> Result<serde_json::Value, OpsError> {
        let engine = self.engine_for(device_id)?;
        self.admit()?;
        let timeout = self.timeout_of(timeout_ms);
        let operation_id = self
            .begin(
                device_id,
                "operate",
                serde_json::json!({ "command": command }),
                timeout,
            )
            .await?;
        match engine.operate(device_id, command, &args, timeout).await {
            Ok(result) => {
                self.finish_ok(&operation_id, result.clone()).await;
                Ok(result)
            }
            Err(err) => {
                self.finish_err(&operation_id, &err).await;
                Err(err)
            }
        }
    }

    /// scheduleFileTransfer → 传输句柄（终态经订阅投递或轮询 get_transfer）。
    pub async fn schedule_transfer(
        &self,
        device_id: &str,
        spec: TransferSpec,
        timeout_ms: Option<u64>,
    ) -> Result<TransferRecord, OpsError> {
        if spec.direction != "download" && spec.direction != "upload" {
            return Err(OpsError::new(
                ErrorKind::Semantic,
                format!("unknown transfer direction '{}'", spec.direction),
            )
            .not_retryable());
        }
        let engine = self.engine_for(device_id)?;
        self.admit()?;
        let timeout = self.timeout_of(timeout_ms);

        let record = TransferRecord {
            device_id: device_id.to_string(),
            command_key: spec.command_key.clone(),
            direction: spec.direction.clone(),
            url: spec.url.clone(),
            file_type: spec.file_type.clone(),
            username: spec.username.clone(),
            password: spec.password.clone(),
            file_size: spec.file_size.map(|size| size as i64),
            target_file_name: spec.target_file_name.clone(),
            delay_seconds: spec.delay_seconds as i64,
            status: "scheduled".to_string(),
            started_at_ms: Some(now_epoch_ms()),
            completed_at_ms: None,
            fault: None,
        };
        self.transfers.create_transfer(record.clone()).await?;

        let operation_id = self
            .begin(
                device_id,
                "schedule_transfer",
                serde_json::json!({
                    "commandKey": spec.command_key,
                    "direction": spec.direction,
                }),
                timeout,
            )
            .await?;
        match engine.schedule_transfer(device_id, &record, timeout).await {
            Ok(()) => {
                self.finish_ok(
                    &operation_id,
                    serde_json::json!({ "commandKey": record.command_key }),
                )
                .await;
                let _ = self
                    .transfers
                    .update_transfer_status(device_id, &record.command_key, "in_progress", None, None)
                    .await;
                Ok(record)
            }
            Err(err) => {
                self.finish_err(&operation_id, &err).await;
                let _ = self
                    .transfers
                    .update_transfer_status(
                        device_id,
                        &record.command_key,
                        "failed",
                        Some(err.message.clone()),
                        Some(now_epoch_ms()),
                    )
                    .await;
                Err(err)
            }
        }
    }

    /// subscribe：同元组重复创建幂等。
    pub async fn subscribe(
        &self,
        device_id: Option<String>,
        event_type: &str,
        path_pattern: &str,
        delivery_target: &str,
    ) -> Result<SubscriptionRecord, OpsError> {
        PathPattern::parse(path_pattern)
            .map_err(|err| OpsError::invalid_path(path_pattern, err.to_string()))?;
        if let Some(device_id) = &device_id {
            self.registry
                .get(device_id)
                .map_err(|_| OpsError::device_unknown(device_id))?;
        }
        let record = SubscriptionRecord {
            subscription_id: uuid::Uuid::new_v4().to_string(),
            device_id,
            event_type: event_type.to_string(),
            path_pattern: path_pattern.to_string(),
            delivery_target: delivery_target.to_string(),
            status: "active".to_string(),
            created_at_ms: now_epoch_ms(),
            last_delivery_ms: None,
        };
        Ok(self.router.subscribe(record).await?)
    }

    /// 轮询传输状态。
    pub async fn get_transfer(
        &self,
        device_id: &str,
        command_key: &str,
    ) -> Result<Option<TransferRecord>, OpsError> {
        Ok(self.transfers.find_transfer(device_id, command_key).await?)
    }

    /// 数据模型发现：路径与可写性。
    pub async fn discover_parameters(
        &self,
        device_id: &str,
        path: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<ParamInfo>, OpsError> {
        PathPattern::parse(path).map_err(|err| OpsError::invalid_path(path, err.to_string()))?;
        let engine = self.engine_for(device_id)?;
        self.admit()?;
        let timeout = self.timeout_of(timeout_ms);
        let operation_id = self
            .begin(
                device_id,
                "discover_parameters",
                serde_json::json!({ "path": path }),
                timeout,
            )
            .await?;
        match engine.discover(device_id, path, timeout).await {
            Ok(items) => {
                self.finish_ok(&operation_id, serde_json::json!({ "count": items.len() }))
                    .await;
                Ok(items)
            }
            Err(err) => {
                self.finish_err(&operation_id, &err).await;
                Err(err)
            }
        }
    }

    /// 列出对象的现存实例路径。
    pub async fn get_instances(
        &self,
        device_id: &str,
        object_path: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Vec<String>, OpsError> {
        let parsed = PathPattern::parse(object_path)
            .map_err(|err| OpsError::invalid_path(object_path, err.to_string()))?;
        if !parsed.is_prefix() {
            return Err(OpsError::invalid_path(
                object_path,
                "object path must end with '.'",
            ));
        }
        let engine = self.engine_for(device_id)?;
        let timeout = self.timeout_of(timeout_ms);
        Ok(engine.instances(device_id, object_path, timeout).await?)
    }

    /// 设备的全部传输记录。
    pub async fn list_transfers(
        &self,
        device_id: &str,
    ) -> Result<Vec<TransferRecord>, OpsError> {
        Ok(self.transfers.list_transfers(device_id).await?)
    }

    /// 查询操作记录。
    pub async fn get_operation(
        &self,
        operation_id: &str,
    ) -> Result<Option<OperationRecord>, OpsError> {
        Ok(self.operations.get_operation(operation_id).await?)
    }

    /// 设备最近操作。
    pub async fn list_operations(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<OperationRecord>, OpsError> {
        Ok(self.operations.list_operations(device_id, limit).await?)
    }
}

impl OpsError {
    /// 是否为超时（操作记录据此落 timeout 终态）。
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Control && self.message.contains("timed out")
    }
}

fn parse_patterns(patterns: &[String]) -> Result<Vec<PathPattern>, OpsError> {
    if patterns.is_empty() {
        return Err(OpsError::new(ErrorKind::Semantic, "no patterns given").not_retryable());
    }
    patterns
        .iter()
        .map(|raw| {
            PathPattern::parse(raw).map_err(|err| OpsError::invalid_path(raw, err.to_string()))
        })
        .collect()
}
