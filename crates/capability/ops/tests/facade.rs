//! 门面行为测试：幂等合并、操作记录终态、快速失败。

use async_trait::async_trait;
use dms_ops::{
    DeviceEngine, OpsConfig, OpsError, OpsService, SetItem, SetResult,
};
use dms_registry::{DeviceDescriptor, DeviceRegistry, TransportHandle};
use dms_storage::in_memory::{
    InMemoryCacheStore, InMemoryOperationStore, InMemorySubscriptionStore, InMemoryTransferStore,
};
use dms_storage::{OperationStatus, OperationStore, ParameterRecord, TransferRecord};
use dms_usp::SubscriptionRouter;
use domain::{DeviceId, ParamType, PathPattern};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 可编程的假引擎。
struct StubEngine {
    set_calls: AtomicUsize,
    fail_with_timeout: bool,
}

impl StubEngine {
    fn new(fail_with_timeout: bool) -> Arc<Self> {
        Arc::new(Self {
            set_calls: AtomicUsize::new(0),
            fail_with_timeout,
        })
    }
}

#[async_trait]
impl DeviceEngine for StubEngine {
    async fn get_params(
        &self,
        _device_id: &str,
        _patterns: &[PathPattern],
        _timeout: Duration,
    ) -> Result<Vec<ParameterRecord>, OpsError> {
        Ok(Vec::new())
    }

    async fn set_params(
        &self,
        device_id: &str,
        items: &[SetItem],
        _atomic: bool,
        _timeout: Duration,
    ) -> Result<Vec<SetResult>, OpsError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_with_timeout {
            return Err(OpsError::timeout(device_id));
        }
        Ok(items
            .iter()
            .map(|item| SetResult {
                path: item.path.clone(),
                ok: true,
                failure: None,
            })
            .collect())
    }

    async fn add_object(
        &self,
        _device_id: &str,
        _object_path: &str,
        _seed: &[SetItem],
        _timeout: Duration,
    ) -> Result<u32, OpsError> {
        Ok(1)
    }

    async fn delete_object(
        &self,
        _device_id: &str,
        _instance_path: &str,
        _timeout: Duration,
    ) -> Result<(), OpsError> {
        Ok(())
    }

    async fn operate(
        &self,
        _device_id: &str,
        _command: &str,
        _args: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<serde_json::Value, OpsError> {
        Ok(serde_json::json!({ "status": "ok" }))
    }

    async fn schedule_transfer(
        &self,
        _device_id: &str,
        _transfer: &TransferRecord,
        _timeout: Duration,
    ) -> Result<(), OpsError> {
        Ok(())
    }

    async fn discover(
        &self,
        _device_id: &str,
        _path: &str,
        _timeout: Duration,
    ) -> Result<Vec<dms_ops::ParamInfo>, OpsError> {
        Ok(Vec::new())
    }

    async fn instances(
        &self,
        _device_id: &str,
        _object_path: &str,
        _timeout: Duration,
    ) -> Result<Vec<String>, OpsError> {
        Ok(Vec::new())
    }

    fn supports_immediate(&self) -> bool {
        true
    }
}

struct Harness {
    ops: Arc<OpsService>,
    engine: Arc<StubEngine>,
    operations: Arc<InMemoryOperationStore>,
}

fn harness(fail_with_timeout: bool) -> Harness {
    let registry = Arc::new(DeviceRegistry::new(300_000));
    registry
        .register(
            &DeviceId::usp("os::agent-1"),
            DeviceDescriptor::default(),
            TransportHandle::Usp {
                transport: "mock".to_string(),
                address: "addr".to_string(),
            },
        )
        .expect("register");

    let operations = Arc::new(InMemoryOperationStore::new());
    let engine = StubEngine::new(fail_with_timeout);
    let (router, _deliveries) = SubscriptionRouter::new(Arc::new(InMemorySubscriptionStore::new()), 16);
    let transfers = Arc::new(InMemoryTransferStore::new());
    let sink = dms_pipeline::PersistSink::spawn(
        Arc::new(dms_storage::in_memory::InMemoryParameterStore::new()),
        transfers.clone(),
        dms_pipeline::SinkConfig::default(),
    );
    let ops = OpsService::new(
        registry,
        engine.clone(),
        StubEngine::new(false),
        operations.clone(),
        transfers,
        Arc::new(InMemoryCacheStore::new()),
        Arc::new(router),
        sink,
        OpsConfig::default(),
    );
    Harness {
        ops,
        engine,
        operations,
    }
}

fn set_items() -> Vec<SetItem> {
    vec![SetItem {
        path: "Device.WiFi.Radio.1.Enable".to_string(),
        value: "true".to_string(),
        param_type: ParamType::Boolean,
    }]
}

#[tokio::test]
async fn idempotent_replay_skips_device() {
    let harness = harness(false);
    let first = harness
        .ops
        .set_parameters(
            "os::agent-1",
            set_items(),
            false,
            Some("key-1".to_string()),
            None,
        )
        .await
        .expect("first");
    assert!(first[0].ok);
    assert_eq!(harness.engine.set_calls.load(Ordering::SeqCst), 1);

    // 窗口内重放：结果一致，设备侧不再被触碰
    let replay = harness
        .ops
        .set_parameters(
            "os::agent-1",
            set_items(),
            false,
            Some("key-1".to_string()),
            None,
        )
        .await
        .expect("replay");
    assert_eq!(replay.len(), 1);
    assert!(replay[0].ok);
    assert_eq!(harness.engine.set_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeout_marks_operation_terminal_timeout() {
    let harness = harness(true);
    let err = harness
        .ops
        .set_parameters("os::agent-1", set_items(), false, None, None)
        .await
        .expect_err("timeout");
    assert!(err.is_timeout());

    let operations = harness
        .operations
        .list_operations("os::agent-1", 10)
        .await
        .expect("list");
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].status, OperationStatus::Timeout);
    // 终态不可再改写
    assert!(harness
        .operations
        .update_operation(
            &operations[0].operation_id,
            dms_storage::OperationPatch::finish(OperationStatus::Completed),
        )
        .await
        .is_err());
}

#[tokio::test]
async fn unknown_device_fails_before_engine() {
    let harness = harness(false);
    let err = harness
        .ops
        .set_parameters("os::ghost", set_items(), false, None, None)
        .await
        .expect_err("unknown");
    assert_eq!(err.to_dto().kind, "lifecycle");
    assert_eq!(harness.engine.set_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_pattern_is_semantic_error() {
    let harness = harness(false);
    let err = harness
        .ops
        .get_parameters("os::agent-1", &["Device..Bad".to_string()], None)
        .await
        .expect_err("invalid");
    assert_eq!(err.to_dto().kind, "semantic");
    assert!(!err.retryable);
}

#[tokio::test]
async fn subscribe_is_idempotent_for_same_tuple() {
    let harness = harness(false);
    let first = harness
        .ops
        .subscribe(
            Some("os::agent-1".to_string()),
            "value_change",
            "Device.WiFi.Radio.*.Channel",
            "ops-queue",
        )
        .await
        .expect("subscribe");
    let second = harness
        .ops
        .subscribe(
            Some("os::agent-1".to_string()),
            "value_change",
            "Device.WiFi.Radio.*.Channel",
            "ops-queue",
        )
        .await
        .expect("subscribe again");
    assert_eq!(first.subscription_id, second.subscription_id);
}
