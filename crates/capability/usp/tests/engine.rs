//! USP 引擎行为测试：关联表、超时、迟到应答、Notify 路由。

use async_trait::async_trait;
use bytes::Bytes;
use dms_pipeline::{PersistSink, SinkConfig};
use dms_registry::{DeviceDescriptor, DeviceRegistry, TransportHandle};
use dms_storage::in_memory::{
    InMemoryParameterStore, InMemorySubscriptionStore, InMemoryTransferStore,
};
use dms_storage::{SubscriptionRecord, SubscriptionStore};
use dms_transport::{InboundFrame, MtpTransport, TransportError};
use dms_usp::{
    event_types, Msg, MsgBody, ParamValue, Record, RequestBody, ResponseBody, SubscriptionRouter,
    UspEngine, UspEngineConfig, UspError,
};
use domain::{now_epoch_ms, DeviceId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// 应答策略。
#[derive(Clone, Copy)]
enum ReplyMode {
    /// 解码请求并立即回应答
    Auto,
    /// 延迟一段时间后再回
    Delayed(u64),
    /// 永不应答
    Silent,
}

struct MockTransport {
    inbound: mpsc::Sender<InboundFrame>,
    mode: ReplyMode,
    sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    inflight: Arc<AtomicUsize>,
    max_inflight: Arc<AtomicUsize>,
}

impl MockTransport {
    fn new(inbound: mpsc::Sender<InboundFrame>, mode: ReplyMode) -> Arc<Self> {
        Arc::new(Self {
            inbound,
            mode,
            sent: Arc::new(Mutex::new(Vec::new())),
            inflight: Arc::new(AtomicUsize::new(0)),
            max_inflight: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn reply_for(request: &Msg) -> Msg {
        match &request.body {
            MsgBody::Request(RequestBody::Get { param_paths }) => Msg::response(
                &request.msg_id,
                ResponseBody::GetResp {
                    results: param_paths
                        .iter()
                        .map(|path| ParamValue {
                            path: format!("{}SoftwareVersion", path),
                            value: "1.2.3".to_string(),
                            param_type: "string".to_string(),
                        })
                        .collect(),
                },
            ),
            MsgBody::Request(RequestBody::Set { params, .. }) => Msg::response(
                &request.msg_id,
                ResponseBody::SetResp {
                    updated_paths: params.iter().map(|param| param.path.clone()).collect(),
                },
            ),
            _ => Msg::error(&request.msg_id, 7004, "unsupported in mock"),
        }
    }
}

#[async_trait]
impl MtpTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn send(&self, address: &str, frame: Bytes) -> Result<(), TransportError> {
        self.sent
            .lock()
            .await
            .push((address.to_string(), frame.to_vec()));

        let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inflight.fetch_max(current, Ordering::SeqCst);

        let record = Record::decode(&frame).expect("record");
        let request = Msg::decode(&record.payload).expect("msg");
        let mode = self.mode;
        let inbound = self.inbound.clone();
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            let delay = match mode {
                ReplyMode::Auto => 5,
                ReplyMode::Delayed(ms) => ms,
                ReplyMode::Silent => {
                    inflight.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            inflight.fetch_sub(1, Ordering::SeqCst);
            let reply = MockTransport::reply_for(&request);
            let reply_record = Record::new(&record.from_id, &record.to_id, reply.encode());
            let _ = inbound
                .send(InboundFrame {
                    transport: "mock",
                    origin: "addr-1".to_string(),
                    payload: reply_record.encode(),
                })
                .await;
        });
        Ok(())
    }
}

struct Harness {
    engine: Arc<UspEngine>,
    transport: Arc<MockTransport>,
    deliveries: mpsc::Receiver<dms_usp::DeliveryTask>,
    subscriptions: Arc<InMemorySubscriptionStore>,
    inbound_sender: mpsc::Sender<InboundFrame>,
}

async fn harness(mode: ReplyMode) -> Harness {
    let registry = Arc::new(DeviceRegistry::new(300_000));
    registry
        .register(
            &DeviceId::usp("os::agent-1"),
            DeviceDescriptor::default(),
            TransportHandle::Usp {
                transport: "mock".to_string(),
                address: "addr-1".to_string(),
            },
        )
        .expect("register");

    let subscriptions = Arc::new(InMemorySubscriptionStore::new());
    let (router, deliveries) = SubscriptionRouter::new(subscriptions.clone(), 64);
    let sink = PersistSink::spawn(
        Arc::new(InMemoryParameterStore::new()),
        Arc::new(InMemoryTransferStore::new()),
        SinkConfig::default(),
    );

    let (inbound_sender, inbound_receiver) = mpsc::channel(64);
    let transport = MockTransport::new(inbound_sender.clone(), mode);
    let engine = UspEngine::new(
        UspEngineConfig::default(),
        registry,
        vec![transport.clone() as Arc<dyn MtpTransport>],
        Arc::new(router),
        sink,
    );
    engine.spawn_dispatcher(inbound_receiver);
    Harness {
        engine,
        transport,
        deliveries,
        subscriptions,
        inbound_sender,
    }
}

#[tokio::test]
async fn get_returns_matched_leaves_and_clears_correlation() {
    let harness = harness(ReplyMode::Auto).await;
    let response = harness
        .engine
        .request(
            "os::agent-1",
            RequestBody::Get {
                param_paths: vec!["Device.DeviceInfo.".to_string()],
            },
            Duration::from_secs(5),
        )
        .await
        .expect("get");

    match response {
        ResponseBody::GetResp { results } => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].path, "Device.DeviceInfo.SoftwareVersion");
            assert_eq!(results[0].value, "1.2.3");
        }
        other => panic!("unexpected response: {:?}", other),
    }
    // 返回后关联表为空
    assert_eq!(harness.engine.pending_len(), 0);
}

#[tokio::test]
async fn unknown_device_fails_without_touching_transport() {
    let harness = harness(ReplyMode::Auto).await;
    let err = harness
        .engine
        .request(
            "os::ghost",
            RequestBody::Get {
                param_paths: vec!["Device.".to_string()],
            },
            Duration::from_secs(1),
        )
        .await
        .expect_err("unknown");
    assert!(matches!(err, UspError::DeviceUnknown(_)));
    assert!(harness.transport.sent.lock().await.is_empty());
}

#[tokio::test]
async fn timeout_then_late_response_is_safe() {
    let harness = harness(ReplyMode::Delayed(200)).await;
    let orphans_before = dms_telemetry::metrics().snapshot().orphan_responses;

    let err = harness
        .engine
        .request(
            "os::agent-1",
            RequestBody::Set {
                allow_partial: false,
                params: vec![ParamValue {
                    path: "Device.WiFi.Radio.1.Enable".to_string(),
                    value: "true".to_string(),
                    param_type: "boolean".to_string(),
                }],
            },
            Duration::from_millis(50),
        )
        .await
        .expect_err("timeout");
    assert!(matches!(err, UspError::Timeout));
    assert_eq!(harness.engine.pending_len(), 0);

    // 迟到应答到达后：计数增加，无崩溃、无等待槽泄漏
    tokio::time::sleep(Duration::from_millis(300)).await;
    let orphans_after = dms_telemetry::metrics().snapshot().orphan_responses;
    assert!(orphans_after > orphans_before);
    assert_eq!(harness.engine.pending_len(), 0);
}

#[tokio::test]
async fn mutators_serialize_per_device() {
    let harness = harness(ReplyMode::Delayed(30)).await;
    let engine = harness.engine.clone();

    let set = |engine: Arc<UspEngine>| async move {
        engine
            .request(
                "os::agent-1",
                RequestBody::Set {
                    allow_partial: false,
                    params: vec![ParamValue {
                        path: "Device.WiFi.Radio.1.Channel".to_string(),
                        value: "6".to_string(),
                        param_type: "int".to_string(),
                    }],
                },
                Duration::from_secs(5),
            )
            .await
    };
    let (first, second) = tokio::join!(set(engine.clone()), set(engine.clone()));
    first.expect("first set");
    second.expect("second set");

    // 同设备的两个变更从未同时在途
    assert_eq!(harness.transport.max_inflight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn notify_routes_exactly_one_delivery() {
    let mut harness = harness(ReplyMode::Silent).await;
    harness
        .subscriptions
        .save_subscription(SubscriptionRecord {
            subscription_id: "sub-1".to_string(),
            device_id: Some("os::agent-1".to_string()),
            event_type: event_types::VALUE_CHANGE.to_string(),
            path_pattern: "Device.WiFi.Radio.*.Channel".to_string(),
            delivery_target: "t".to_string(),
            status: "active".to_string(),
            created_at_ms: now_epoch_ms(),
            last_delivery_ms: None,
        })
        .await
        .expect("subscribe");

    let notify = Msg::request(
        "n-1",
        RequestBody::Notify(dms_usp::Notify {
            subscription_id: "sub-1".to_string(),
            send_resp: false,
            event: dms_usp::NotifyEvent::ValueChange {
                param_path: "Device.WiFi.Radio.1.Channel".to_string(),
                param_value: "6".to_string(),
            },
        }),
    );
    let record = Record::new("self::dms-controller", "os::agent-1", notify.encode());
    harness
        .inbound_sender
        .send(InboundFrame {
            transport: "mock",
            origin: "addr-1".to_string(),
            payload: record.encode(),
        })
        .await
        .expect("inject");

    let task = tokio::time::timeout(Duration::from_secs(1), harness.deliveries.recv())
        .await
        .expect("delivered")
        .expect("task");
    assert_eq!(task.event_type, event_types::VALUE_CHANGE);
    assert_eq!(task.path, "Device.WiFi.Radio.1.Channel");
    assert_eq!(task.delivery_target, "t");
    // 恰好一条
    assert!(harness.deliveries.try_recv().is_err());
}

#[tokio::test]
async fn duplicate_notify_is_deduplicated() {
    let mut harness = harness(ReplyMode::Silent).await;
    harness
        .subscriptions
        .save_subscription(SubscriptionRecord {
            subscription_id: "sub-1".to_string(),
            device_id: Some("os::agent-1".to_string()),
            event_type: event_types::VALUE_CHANGE.to_string(),
            path_pattern: "Device.WiFi.Radio.1.Channel".to_string(),
            delivery_target: "t".to_string(),
            status: "active".to_string(),
            created_at_ms: now_epoch_ms(),
            last_delivery_ms: None,
        })
        .await
        .expect("subscribe");

    let notify = Msg::request(
        "dup-1",
        RequestBody::Notify(dms_usp::Notify {
            subscription_id: "sub-1".to_string(),
            send_resp: false,
            event: dms_usp::NotifyEvent::ValueChange {
                param_path: "Device.WiFi.Radio.1.Channel".to_string(),
                param_value: "11".to_string(),
            },
        }),
    );
    let record = Record::new("self::dms-controller", "os::agent-1", notify.encode());
    // 同一帧投递两次（at-least-once 传输语义）
    for _ in 0..2 {
        harness
            .inbound_sender
            .send(InboundFrame {
                transport: "mock",
                origin: "addr-1".to_string(),
                payload: record.encode().to_vec().into(),
            })
            .await
            .expect("inject");
    }

    let first = tokio::time::timeout(Duration::from_secs(1), harness.deliveries.recv())
        .await
        .expect("delivered");
    assert!(first.is_some());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.deliveries.try_recv().is_err());
}
