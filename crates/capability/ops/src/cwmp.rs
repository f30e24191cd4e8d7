//! CWMP 侧的 DeviceEngine 适配。
//!
//! 所有操作都化为排队 RPC，等待设备下个会话取走；fault 按 RPC
//! 计，码原样透传给操作员。

use crate::error::{ErrorKind, OpsError};
use crate::{DeviceEngine, SetItem, SetResult};
use async_trait::async_trait;
use dms_cwmp::{
    fault_codes, AcsRpc, AcsService, CpeMessage, DownloadArgs, ParameterValue, RpcOutcome,
    UploadArgs,
};
use dms_storage::{InstanceRecord, InstanceStore, ParameterRecord, ParameterStore, TransferRecord};
use domain::{now_epoch_ms, validate_value, ParamType, ParameterPath, PathPattern};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// CWMP CPE 的操作引擎。
pub struct CwmpDeviceEngine {
    acs: Arc<AcsService>,
    parameters: Arc<dyn ParameterStore>,
    instances: Arc<dyn InstanceStore>,
}

impl CwmpDeviceEngine {
    pub fn new(
        acs: Arc<AcsService>,
        parameters: Arc<dyn ParameterStore>,
        instances: Arc<dyn InstanceStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            acs,
            parameters,
            instances,
        })
    }

    /// 排队一条 RPC 并等待结局。
    async fn call(
        &self,
        device_id: &str,
        rpc: AcsRpc,
        timeout: Duration,
    ) -> Result<CpeMessage, OpsError> {
        let receiver = self
            .acs
            .enqueue_rpc(device_id, rpc)
            .await
            .map_err(|err| OpsError::from(err).with_device(device_id))?;
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(RpcOutcome::Response(message))) => Ok(message),
            Ok(Ok(RpcOutcome::Fault { code, text })) => Err(map_fault(code, text)
                .with_device(device_id)),
            Ok(Ok(RpcOutcome::SessionLost)) | Ok(Err(_)) => {
                Err(OpsError::new(ErrorKind::Session, "session lost").with_device(device_id))
            }
            Err(_) => {
                dms_telemetry::record_rpc_timeout();
                Err(OpsError::timeout(device_id))
            }
        }
    }

    async fn persist(&self, device_id: &str, records: Vec<ParameterRecord>) {
        if records.is_empty() {
            return;
        }
        if let Err(err) = self.parameters.upsert_parameters(device_id, &records).await {
            warn!(target: "dms.ops", device_id = %device_id, error = %err, "result persist failed");
            dms_telemetry::record_store_write_failure();
        }
    }
}

/// CWMP 故障码 → 门面错误（码原样保留）。
fn map_fault(code: u32, text: String) -> OpsError {
    let kind = match code {
        fault_codes::RESOURCES_EXCEEDED
        | fault_codes::INVALID_PARAMETER_NAME
        | fault_codes::INVALID_PARAMETER_TYPE
        | fault_codes::INVALID_PARAMETER_VALUE
        | fault_codes::NON_WRITABLE_PARAMETER => ErrorKind::Semantic,
        fault_codes::REQUEST_DENIED => ErrorKind::Semantic,
        _ => ErrorKind::Protocol,
    };
    OpsError::new(kind, text).with_code(code).not_retryable()
}

/// 模式里第一个 `*` 之前的字面前缀作为 CWMP 的部分路径。
fn partial_path(pattern: &PathPattern) -> String {
    let raw = pattern.as_str();
    match raw.find('*') {
        Some(index) => {
            let prefix = &raw[..index];
            // 截到最后一个完整段
            match prefix.rfind('.') {
                Some(dot) => prefix[..=dot].to_string(),
                None => String::new(),
            }
        }
        None => raw.to_string(),
    }
}

fn to_parameter_values(items: &[SetItem]) -> Vec<ParameterValue> {
    items
        .iter()
        .map(|item| ParameterValue {
            name: item.path.clone(),
            value: item.value.clone(),
            param_type: item.param_type.xsd_name().to_string(),
        })
        .collect()
}

#[async_trait]
impl DeviceEngine for CwmpDeviceEngine {
    async fn get_params(
        &self,
        device_id: &str,
        patterns: &[PathPattern],
        timeout: Duration,
    ) -> Result<Vec<ParameterRecord>, OpsError> {
        let names: Vec<String> = patterns.iter().map(partial_path).collect();
        let message = self
            .call(device_id, AcsRpc::GetParameterValues { names }, timeout)
            .await?;
        let CpeMessage::GetParameterValuesResponse(values) = message else {
            return Err(
                OpsError::new(ErrorKind::Protocol, "unexpected GetParameterValues reply")
                    .with_device(device_id),
            );
        };

        let now = now_epoch_ms();
        let records: Vec<ParameterRecord> = values
            .into_iter()
            .filter(|value| patterns.iter().any(|pattern| pattern.matches(&value.name)))
            .map(|value| ParameterRecord {
                device_id: device_id.to_string(),
                path: value.name,
                value: value.value,
                param_type: ParamType::parse(&value.param_type),
                writable: false,
                last_update_ms: now,
            })
            .collect();
        self.persist(device_id, records.clone()).await;
        Ok(records)
    }

    async fn set_params(
        &self,
        device_id: &str,
        items: &[SetItem],
        _atomic: bool,
        timeout: Duration,
    ) -> Result<Vec<SetResult>, OpsError> {
        // SetParameterValues 本身就是 all-or-nothing
        for item in items {
            validate_value(&item.value, item.param_type).map_err(|reason| {
                OpsError::new(ErrorKind::Semantic, reason)
                    .with_path(&item.path)
                    .with_device(device_id)
                    .not_retryable()
            })?;
        }

        let rpc = AcsRpc::SetParameterValues {
            params: to_parameter_values(items),
            parameter_key: uuid::Uuid::new_v4().to_string(),
        };
        match self.call(device_id, rpc, timeout).await {
            Ok(CpeMessage::SetParameterValuesResponse { .. }) => {
                let now = now_epoch_ms();
                let records: Vec<ParameterRecord> = items
                    .iter()
                    .map(|item| ParameterRecord {
                        device_id: device_id.to_string(),
                        path: item.path.clone(),
                        value: item.value.clone(),
                        param_type: item.param_type,
                        writable: true,
                        last_update_ms: now,
                    })
                    .collect();
                self.persist(device_id, records).await;
                Ok(items
                    .iter()
                    .map(|item| SetResult {
                        path: item.path.clone(),
                        ok: true,
                        failure: None,
                    })
                    .collect())
            }
            Ok(_) => Err(
                OpsError::new(ErrorKind::Protocol, "unexpected SetParameterValues reply")
                    .with_device(device_id),
            ),
            // 整条 RPC 的 fault 落到每个路径上
            Err(err) if err.kind == ErrorKind::Semantic => Ok(items
                .iter()
                .map(|item| SetResult {
                    path: item.path.clone(),
                    ok: false,
                    failure: Some(err.clone()),
                })
                .collect()),
            Err(err) => Err(err),
        }
    }

    async fn add_object(
        &self,
        device_id: &str,
        object_path: &str,
        seed: &[SetItem],
        timeout: Duration,
    ) -> Result<u32, OpsError> {
        let parsed = ParameterPath::parse(object_path)
            .map_err(|err| OpsError::invalid_path(object_path, err.to_string()))?;
        if !parsed.is_object() {
            return Err(OpsError::invalid_path(
                object_path,
                "object path must end with '.'",
            ));
        }

        let message = self
            .call(
                device_id,
                AcsRpc::AddObject {
                    object_name: object_path.to_string(),
                    parameter_key: uuid::Uuid::new_v4().to_string(),
                },
                timeout,
            )
            .await?;
        let CpeMessage::AddObjectResponse {
            instance_number, ..
        } = message
        else {
            return Err(OpsError::new(ErrorKind::Protocol, "unexpected AddObject reply")
                .with_device(device_id));
        };

        if let Err(err) = self
            .instances
            .create_instance(InstanceRecord {
                device_id: device_id.to_string(),
                object_path: object_path.to_string(),
                instance_number,
                created_at_ms: now_epoch_ms(),
            })
            .await
        {
            warn!(target: "dms.ops", device_id = %device_id, error = %err, "instance record failed");
        }

        if !seed.is_empty() {
            let seeded: Vec<SetItem> = seed
                .iter()
                .map(|item| SetItem {
                    path: format!("{}{}.{}", object_path, instance_number, item.path),
                    value: item.value.clone(),
                    param_type: item.param_type,
                })
                .collect();
            self.set_params(device_id, &seeded, true, timeout).await?;
        }
        Ok(instance_number)
    }

    async fn delete_object(
        &self,
        device_id: &str,
        instance_path: &str,
        timeout: Duration,
    ) -> Result<(), OpsError> {
        let parsed = ParameterPath::parse(instance_path)
            .map_err(|err| OpsError::invalid_path(instance_path, err.to_string()))?;
        let Some(instance_number) = parsed.instance_number() else {
            return Err(OpsError::invalid_path(
                instance_path,
                "expected an instance path",
            ));
        };
        let object_path = parsed
            .object_of_instance()
            .unwrap_or_else(|| instance_path.to_string());
        let wire_path = format!("{}{}.", object_path, instance_number);

        let message = self
            .call(
                device_id,
                AcsRpc::DeleteObject {
                    object_name: wire_path.clone(),
                    parameter_key: uuid::Uuid::new_v4().to_string(),
                },
                timeout,
            )
            .await?;
        if !matches!(message, CpeMessage::DeleteObjectResponse { .. }) {
            return Err(OpsError::new(ErrorKind::Protocol, "unexpected DeleteObject reply")
                .with_device(device_id));
        }

        let _ = self
            .instances
            .delete_instance(device_id, &object_path, instance_number)
            .await;
        let _ = self
            .parameters
            .delete_parameters_by_prefix(device_id, &wire_path)
            .await;
        Ok(())
    }

    async fn operate(
        &self,
        device_id: &str,
        command: &str,
        _args: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, OpsError> {
        let rpc = match command {
            "Device.Reboot()" => AcsRpc::Reboot {
                command_key: uuid::Uuid::new_v4().to_string(),
            },
            "Device.FactoryReset()" => AcsRpc::FactoryReset,
            other => {
                return Err(OpsError::new(
                    ErrorKind::Semantic,
                    format!("method not supported: {}", other),
                )
                .with_code(fault_codes::METHOD_NOT_SUPPORTED)
                .with_device(device_id)
                .not_retryable());
            }
        };
        let message = self.call(device_id, rpc, timeout).await?;
        match message {
            CpeMessage::RebootResponse | CpeMessage::FactoryResetResponse => {
                Ok(serde_json::json!({ "status": "ok" }))
            }
            _ => Err(OpsError::new(ErrorKind::Protocol, "unexpected operate reply")
                .with_device(device_id)),
        }
    }

    async fn schedule_transfer(
        &self,
        device_id: &str,
        transfer: &TransferRecord,
        timeout: Duration,
    ) -> Result<(), OpsError> {
        let rpc = if transfer.direction == "upload" {
            AcsRpc::Upload(UploadArgs {
                command_key: transfer.command_key.clone(),
                file_type: transfer.file_type.clone(),
                url: transfer.url.clone(),
                username: transfer.username.clone().unwrap_or_default(),
                password: transfer.password.clone().unwrap_or_default(),
                delay_seconds: transfer.delay_seconds as u32,
            })
        } else {
            AcsRpc::Download(DownloadArgs {
                command_key: transfer.command_key.clone(),
                file_type: transfer.file_type.clone(),
                url: transfer.url.clone(),
                username: transfer.username.clone().unwrap_or_default(),
                password: transfer.password.clone().unwrap_or_default(),
                file_size: transfer.file_size.unwrap_or(0) as u64,
                target_file_name: transfer.target_file_name.clone().unwrap_or_default(),
                delay_seconds: transfer.delay_seconds as u32,
                success_url: String::new(),
                failure_url: String::new(),
            })
        };
        let message = self.call(device_id, rpc, timeout).await?;
        match message {
            CpeMessage::DownloadResponse { .. } | CpeMessage::UploadResponse { .. } => Ok(()),
            _ => Err(OpsError::new(ErrorKind::Protocol, "unexpected transfer reply")
                .with_device(device_id)),
        }
    }

    async fn discover(
        &self,
        device_id: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<crate::ParamInfo>, OpsError> {
        let message = self
            .call(
                device_id,
                AcsRpc::GetParameterNames {
                    parameter_path: path.to_string(),
                    next_level: false,
                },
                timeout,
            )
            .await?;
        let CpeMessage::GetParameterNamesResponse(infos) = message else {
            return Err(
                OpsError::new(ErrorKind::Protocol, "unexpected GetParameterNames reply")
                    .with_device(device_id),
            );
        };

        // 据发现结果刷新已存参数的 Writable 标记
        let now = now_epoch_ms();
        let mut refreshed = Vec::new();
        for info in &infos {
            if let Ok(Some(mut record)) = self.parameters.get_parameter(device_id, &info.name).await
            {
                if record.writable != info.writable {
                    record.writable = info.writable;
                    record.last_update_ms = now;
                    refreshed.push(record);
                }
            }
        }
        self.persist(device_id, refreshed).await;

        Ok(infos
            .into_iter()
            .map(|info| crate::ParamInfo {
                path: info.name,
                writable: info.writable,
            })
            .collect())
    }

    async fn instances(
        &self,
        device_id: &str,
        object_path: &str,
        _timeout: Duration,
    ) -> Result<Vec<String>, OpsError> {
        // CWMP 没有专门的实例枚举 RPC，取本地实例表视图
        let instances = self.instances.list_instances(device_id, object_path).await?;
        Ok(instances
            .into_iter()
            .map(|instance| format!("{}{}.", instance.object_path, instance.instance_number))
            .collect())
    }

    fn supports_immediate(&self) -> bool {
        false
    }
}
