//! 持久化下沉管道。
//!
//! 协议引擎的入站分发不允许阻塞在存储 I/O 上：参数增量与传输状态
//! 变更统一交给本管道的有界工作池异步落库。
//!
//! 背压纪律：
//! - 操作员路径（submit_operator）在队列满时返回 [`PipelineError::Pushback`]
//! - 入站事件路径（submit_event）在队列满时丢弃并计数，绝不向设备侧回压
//! - 写入失败按指数退避重试至上限，最终失败计数后丢弃

use dms_storage::retry::Backoff;
use dms_storage::{ParameterRecord, ParameterStore, TransferStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// 管道错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 队列饱和（仅操作员路径可见）
    #[error("persist queue saturated")]
    Pushback,
    /// 工作池已关闭
    #[error("persist workers stopped")]
    Closed,
}

/// 管道参数。
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub workers: usize,
    pub queue_cap: usize,
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_cap: 10_000,
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

/// 落库任务。
#[derive(Debug)]
enum SinkTask {
    UpsertParameters {
        device_id: String,
        parameters: Vec<ParameterRecord>,
    },
    TransferStatus {
        device_id: String,
        command_key: String,
        status: String,
        fault: Option<String>,
        completed_at_ms: Option<i64>,
    },
}

/// 持久化下沉入口。克隆共享同一工作池。
#[derive(Clone)]
pub struct PersistSink {
    sender: mpsc::Sender<SinkTask>,
}

impl PersistSink {
    /// 启动工作池并返回入口。
    pub fn spawn(
        parameter_store: Arc<dyn ParameterStore>,
        transfer_store: Arc<dyn TransferStore>,
        config: SinkConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_cap.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        for _ in 0..config.workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let parameter_store = Arc::clone(&parameter_store);
            let transfer_store = Arc::clone(&transfer_store);
            let config = config.clone();
            tokio::spawn(async move {
                loop {
                    let task = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    let Some(task) = task else {
                        break;
                    };
                    run_task(&parameter_store, &transfer_store, &config, task).await;
                }
            });
        }
        Self { sender }
    }

    /// 工作池是否还有余量（操作员新请求的准入判断）。
    pub fn has_capacity(&self) -> bool {
        self.sender.capacity() > 0
    }

    /// 操作员路径提交：队列满即背压。
    pub fn submit_parameters_operator(
        &self,
        device_id: &str,
        parameters: Vec<ParameterRecord>,
    ) -> Result<(), PipelineError> {
        let task = SinkTask::UpsertParameters {
            device_id: device_id.to_string(),
            parameters,
        };
        match self.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                dms_telemetry::record_pushback();
                Err(PipelineError::Pushback)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::Closed),
        }
    }

    /// 入站事件路径提交：队列满丢弃并计数，永不报错给设备侧。
    pub fn submit_parameters_event(&self, device_id: &str, parameters: Vec<ParameterRecord>) {
        let task = SinkTask::UpsertParameters {
            device_id: device_id.to_string(),
            parameters,
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(task) {
            dms_telemetry::record_dropped_event();
        }
    }

    /// 入站事件路径的传输状态流转。
    pub fn submit_transfer_status(
        &self,
        device_id: &str,
        command_key: &str,
        status: &str,
        fault: Option<String>,
        completed_at_ms: Option<i64>,
    ) {
        let task = SinkTask::TransferStatus {
            device_id: device_id.to_string(),
            command_key: command_key.to_string(),
            status: status.to_string(),
            fault,
            completed_at_ms,
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(task) {
            dms_telemetry::record_dropped_event();
        }
    }
}

async fn run_task(
    parameter_store: &Arc<dyn ParameterStore>,
    transfer_store: &Arc<dyn TransferStore>,
    config: &SinkConfig,
    task: SinkTask,
) {
    let mut attempt: u32 = 0;
    loop {
        let result = match &task {
            SinkTask::UpsertParameters {
                device_id,
                parameters,
            } => parameter_store.upsert_parameters(device_id, parameters).await,
            SinkTask::TransferStatus {
                device_id,
                command_key,
                status,
                fault,
                completed_at_ms,
            } => {
                transfer_store
                    .update_transfer_status(
                        device_id,
                        command_key,
                        status,
                        fault.clone(),
                        *completed_at_ms,
                    )
                    .await
            }
        };
        match result {
            Ok(()) => return,
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                dms_telemetry::record_store_retry();
                tokio::time::sleep(config.backoff.delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => {
                dms_telemetry::record_store_write_failure();
                warn!(target: "dms.pipeline", error = %err, "persist task dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dms_storage::{StorageError, TransferRecord};
    use domain::{ParamType, PathPattern};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyParameterStore {
        failures_left: AtomicU32,
        writes: AtomicU32,
    }

    #[async_trait]
    impl ParameterStore for FlakyParameterStore {
        async fn upsert_parameters(
            &self,
            _device_id: &str,
            _parameters: &[ParameterRecord],
        ) -> Result<(), StorageError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StorageError::Unavailable("down".to_string()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn get_parameters(
            &self,
            _device_id: &str,
            _pattern: &PathPattern,
        ) -> Result<Vec<ParameterRecord>, StorageError> {
            Ok(Vec::new())
        }

        async fn get_parameter(
            &self,
            _device_id: &str,
            _path: &str,
        ) -> Result<Option<ParameterRecord>, StorageError> {
            Ok(None)
        }

        async fn delete_parameters_by_prefix(
            &self,
            _device_id: &str,
            _prefix: &str,
        ) -> Result<u64, StorageError> {
            Ok(0)
        }

        async fn delete_parameters(&self, _device_id: &str) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    struct NoopTransferStore;

    #[async_trait]
    impl TransferStore for NoopTransferStore {
        async fn create_transfer(&self, _record: TransferRecord) -> Result<(), StorageError> {
            Ok(())
        }

        async fn find_transfer(
            &self,
            _device_id: &str,
            _command_key: &str,
        ) -> Result<Option<TransferRecord>, StorageError> {
            Ok(None)
        }

        async fn update_transfer_status(
            &self,
            _device_id: &str,
            _command_key: &str,
            _status: &str,
            _fault: Option<String>,
            _completed_at_ms: Option<i64>,
        ) -> Result<(), StorageError> {
            Ok(())
        }

        async fn list_transfers(
            &self,
            _device_id: &str,
        ) -> Result<Vec<TransferRecord>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn sample_parameters() -> Vec<ParameterRecord> {
        vec![ParameterRecord {
            device_id: "agent-1".to_string(),
            path: "Device.DeviceInfo.SoftwareVersion".to_string(),
            value: "1.0".to_string(),
            param_type: ParamType::String,
            writable: false,
            last_update_ms: 1,
        }]
    }

    #[tokio::test]
    async fn retries_unavailable_store_then_writes() {
        let store = Arc::new(FlakyParameterStore {
            failures_left: AtomicU32::new(2),
            writes: AtomicU32::new(0),
        });
        let sink = PersistSink::spawn(
            store.clone(),
            Arc::new(NoopTransferStore),
            SinkConfig {
                workers: 1,
                queue_cap: 4,
                max_retries: 3,
                backoff: Backoff {
                    min_ms: 1,
                    max_ms: 2,
                    factor: 2,
                },
            },
        );
        sink.submit_parameters_event("agent-1", sample_parameters());

        // 等待工作协程完成重试
        for _ in 0..50 {
            if store.writes.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn operator_path_gets_pushback_when_full() {
        // 单工作协程 + 容量 1，先塞满队列再验证背压
        let store = Arc::new(FlakyParameterStore {
            failures_left: AtomicU32::new(1_000_000),
            writes: AtomicU32::new(0),
        });
        let sink = PersistSink::spawn(
            store,
            Arc::new(NoopTransferStore),
            SinkConfig {
                workers: 1,
                queue_cap: 1,
                max_retries: 1_000,
                backoff: Backoff {
                    min_ms: 50,
                    max_ms: 50,
                    factor: 1,
                },
            },
        );

        let mut saw_pushback = false;
        for _ in 0..16 {
            if matches!(
                sink.submit_parameters_operator("agent-1", sample_parameters()),
                Err(PipelineError::Pushback)
            ) {
                saw_pushback = true;
                break;
            }
        }
        assert!(saw_pushback);
    }
}
