//! USP 侧的 DeviceEngine 适配。

use crate::error::{ErrorKind, OpsError};
use crate::{DeviceEngine, SetItem, SetResult};
use async_trait::async_trait;
use dms_storage::{InstanceRecord, InstanceStore, ParameterRecord, ParameterStore, TransferRecord};
use dms_usp::{ParamValue, RequestBody, ResponseBody, UspEngine};
use domain::{now_epoch_ms, validate_value, ParameterPath, PathPattern};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// USP Agent 的操作引擎。
pub struct UspDeviceEngine {
    engine: Arc<UspEngine>,
    parameters: Arc<dyn ParameterStore>,
    instances: Arc<dyn InstanceStore>,
}

impl UspDeviceEngine {
    pub fn new(
        engine: Arc<UspEngine>,
        parameters: Arc<dyn ParameterStore>,
        instances: Arc<dyn InstanceStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            parameters,
            instances,
        })
    }

    /// 操作结果回写存储（尽力而为，失败只计数）。
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

fn to_param_values(items: &[SetItem]) -> Vec<ParamValue> {
    items
        .iter()
        .map(|item| ParamValue {
            path: item.path.clone(),
            value: item.value.clone(),
            param_type: item.param_type.to_string(),
        })
        .collect()
}

/// 从 `Device.WiFi.SSID.3.` 形态的实例路径解出实例号。
fn instance_number_of(instantiated_path: &str) -> Option<u32> {
    instantiated_path
        .trim_end_matches('.')
        .rsplit('.')
        .next()
        .and_then(|segment| segment.parse().ok())
}

#[async_trait]
impl DeviceEngine for UspDeviceEngine {
    async fn get_params(
        &self,
        device_id: &str,
        patterns: &[PathPattern],
        timeout: Duration,
    ) -> Result<Vec<ParameterRecord>, OpsError> {
        let response = self
            .engine
            .request(
                device_id,
                RequestBody::Get {
                    param_paths: patterns.iter().map(|p| p.as_str().to_string()).collect(),
                },
                timeout,
            )
            .await?;
        let ResponseBody::GetResp { results } = response else {
            return Err(OpsError::new(ErrorKind::Protocol, "unexpected response to Get")
                .with_device(device_id));
        };

        let now = now_epoch_ms();
        let records: Vec<ParameterRecord> = results
            .into_iter()
            .map(|result| ParameterRecord {
                device_id: device_id.to_string(),
                path: result.path,
                value: result.value,
                param_type: domain::ParamType::parse(&result.param_type),
                writable: true,
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
        atomic: bool,
        timeout: Duration,
    ) -> Result<Vec<SetResult>, OpsError> {
        for item in items {
            validate_value(&item.value, item.param_type).map_err(|reason| {
                OpsError::new(ErrorKind::Semantic, reason)
                    .with_path(&item.path)
                    .with_device(device_id)
                    .not_retryable()
            })?;
        }

        let response = self
            .engine
            .request(
                device_id,
                RequestBody::Set {
                    allow_partial: !atomic,
                    params: to_param_values(items),
                },
                timeout,
            )
            .await;

        match response {
            Ok(ResponseBody::SetResp { updated_paths }) => {
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
                        ok: updated_paths.is_empty() || updated_paths.contains(&item.path),
                        failure: None,
                    })
                    .collect())
            }
            Ok(_) => Err(OpsError::new(ErrorKind::Protocol, "unexpected response to Set")
                .with_device(device_id)),
            Err(err) => Err(OpsError::from(err).with_device(device_id)),
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

        let response = self
            .engine
            .request(
                device_id,
                RequestBody::Add {
                    obj_path: object_path.to_string(),
                    params: to_param_values(seed),
                },
                timeout,
            )
            .await
            .map_err(|err| OpsError::from(err).with_device(device_id))?;
        let ResponseBody::AddResp { instantiated_path } = response else {
            return Err(OpsError::new(ErrorKind::Protocol, "unexpected response to Add")
                .with_device(device_id));
        };
        let instance_number = instance_number_of(&instantiated_path).ok_or_else(|| {
            OpsError::new(
                ErrorKind::Protocol,
                format!("bad instantiated path '{}'", instantiated_path),
            )
            .with_device(device_id)
        })?;

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
        let now = now_epoch_ms();
        let seeded: Vec<ParameterRecord> = seed
            .iter()
            .map(|item| ParameterRecord {
                device_id: device_id.to_string(),
                path: format!("{}{}.{}", object_path, instance_number, item.path),
                value: item.value.clone(),
                param_type: item.param_type,
                writable: true,
                last_update_ms: now,
            })
            .collect();
        self.persist(device_id, seeded).await;
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

        self.engine
            .request(
                device_id,
                RequestBody::Delete {
                    obj_paths: vec![wire_path.clone()],
                },
                timeout,
            )
            .await
            .map_err(|err| OpsError::from(err).with_device(device_id))?;

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
        args: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, OpsError> {
        let response = self
            .engine
            .request(
                device_id,
                RequestBody::Operate {
                    command: command.to_string(),
                    command_key: uuid::Uuid::new_v4().to_string(),
                    input_args_json: args.to_string(),
                },
                timeout,
            )
            .await
            .map_err(|err| OpsError::from(err).with_device(device_id))?;
        let ResponseBody::OperateResp { output_args_json } = response else {
            return Err(
                OpsError::new(ErrorKind::Protocol, "unexpected response to Operate")
                    .with_device(device_id),
            );
        };
        Ok(serde_json::from_str(&output_args_json)
            .unwrap_or(serde_json::Value::String(output_args_json)))
    }

    async fn schedule_transfer(
        &self,
        device_id: &str,
        transfer: &TransferRecord,
        timeout: Duration,
    ) -> Result<(), OpsError> {
        let command = if transfer.direction == "upload" {
            "Device.LocalAgent.ScheduleUpload()"
        } else {
            "Device.LocalAgent.ScheduleDownload()"
        };
        let args = serde_json::json!({
            "url": transfer.url,
            "fileType": transfer.file_type,
            "username": transfer.username,
            "password": transfer.password,
            "delaySeconds": transfer.delay_seconds,
            "targetFileName": transfer.target_file_name,
        });
        self.engine
            .request(
                device_id,
                RequestBody::Operate {
                    command: command.to_string(),
                    command_key: transfer.command_key.clone(),
                    input_args_json: args.to_string(),
                },
                timeout,
            )
            .await
            .map_err(|err| OpsError::from(err).with_device(device_id))?;
        Ok(())
    }

    async fn discover(
        &self,
        device_id: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<Vec<crate::ParamInfo>, OpsError> {
        let response = self
            .engine
            .request(
                device_id,
                RequestBody::GetSupportedDm {
                    obj_paths: vec![path.to_string()],
                },
                timeout,
            )
            .await
            .map_err(|err| OpsError::from(err).with_device(device_id))?;
        let ResponseBody::GetSupportedDmResp { params } = response else {
            return Err(
                OpsError::new(ErrorKind::Protocol, "unexpected response to GetSupportedDM")
                    .with_device(device_id),
            );
        };
        Ok(params
            .into_iter()
            .map(|param| crate::ParamInfo {
                path: param.path,
                writable: param.writable,
            })
            .collect())
    }

    async fn instances(
        &self,
        device_id: &str,
        object_path: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, OpsError> {
        let response = self
            .engine
            .request(
                device_id,
                RequestBody::GetInstances {
                    obj_paths: vec![object_path.to_string()],
                },
                timeout,
            )
            .await
            .map_err(|err| OpsError::from(err).with_device(device_id))?;
        let ResponseBody::GetInstancesResp { instance_paths } = response else {
            return Err(
                OpsError::new(ErrorKind::Protocol, "unexpected response to GetInstances")
                    .with_device(device_id),
            );
        };
        Ok(instance_paths)
    }

    fn supports_immediate(&self) -> bool {
        true
    }
}
