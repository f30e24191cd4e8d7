//! 经由门面的 USP 往返性质：写后读一致、增删归零。

use async_trait::async_trait;
use bytes::Bytes;
use dms_ops::{CwmpDeviceEngine, OpsConfig, OpsService, SetItem, UspDeviceEngine};
use dms_pipeline::{PersistSink, SinkConfig};
use dms_registry::{DeviceDescriptor, DeviceRegistry, TransportHandle};
use dms_storage::in_memory::{
    InMemoryCacheStore, InMemoryInstanceStore, InMemoryOperationStore, InMemoryParameterStore,
    InMemorySubscriptionStore, InMemoryTransferStore,
};
use dms_storage::InstanceStore;
use dms_transport::{InboundFrame, MtpTransport, TransportError};
use dms_usp::{
    Msg, MsgBody, ParamValue, Record, RequestBody, ResponseBody, SubscriptionRouter, UspEngine,
    UspEngineConfig,
};
use domain::{DeviceId, ParamType};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// 模拟 Agent：维护一个扁平数据模型，对请求立即应答。
struct AgentSim {
    inbound: mpsc::Sender<InboundFrame>,
    model: Arc<Mutex<BTreeMap<String, String>>>,
    instance_counters: Arc<Mutex<HashMap<String, u32>>>,
}

impl AgentSim {
    fn new(inbound: mpsc::Sender<InboundFrame>) -> Arc<Self> {
        Arc::new(Self {
            inbound,
            model: Arc::new(Mutex::new(BTreeMap::new())),
            instance_counters: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn reply_for(&self, request: &Msg) -> Msg {
        let MsgBody::Request(body) = &request.body else {
            return Msg::error(&request.msg_id, 7001, "not a request");
        };
        match body {
            RequestBody::Get { param_paths } => {
                let model = self.model.lock().await;
                let results = model
                    .iter()
                    .filter(|(path, _)| {
                        param_paths.iter().any(|pattern| {
                            if pattern.ends_with('.') {
                                path.starts_with(pattern.as_str())
                            } else {
                                path.as_str() == pattern
                            }
                        })
                    })
                    .map(|(path, value)| ParamValue {
                        path: path.clone(),
                        value: value.clone(),
                        param_type: "string".to_string(),
                    })
                    .collect();
                Msg::response(&request.msg_id, ResponseBody::GetResp { results })
            }
            RequestBody::Set { params, .. } => {
                let mut model = self.model.lock().await;
                let mut updated = Vec::new();
                for param in params {
                    model.insert(param.path.clone(), param.value.clone());
                    updated.push(param.path.clone());
                }
                Msg::response(
                    &request.msg_id,
                    ResponseBody::SetResp {
                        updated_paths: updated,
                    },
                )
            }
            RequestBody::Add { obj_path, params } => {
                let mut counters = self.instance_counters.lock().await;
                let next = counters.entry(obj_path.clone()).or_insert(0);
                *next += 1;
                let instance_path = format!("{}{}.", obj_path, next);
                let mut model = self.model.lock().await;
                for param in params {
                    model.insert(format!("{}{}", instance_path, param.path), param.value.clone());
                }
                Msg::response(
                    &request.msg_id,
                    ResponseBody::AddResp {
                        instantiated_path: instance_path,
                    },
                )
            }
            RequestBody::Delete { obj_paths } => {
                let mut model = self.model.lock().await;
                let mut affected = Vec::new();
                for prefix in obj_paths {
                    model.retain(|path, _| {
                        if path.starts_with(prefix.as_str()) {
                            affected.push(path.clone());
                            false
                        } else {
                            true
                        }
                    });
                }
                Msg::response(
                    &request.msg_id,
                    ResponseBody::DeleteResp {
                        affected_paths: affected,
                    },
                )
            }
            _ => Msg::error(&request.msg_id, 7001, "unsupported"),
        }
    }
}

#[async_trait]
impl MtpTransport for AgentSim {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn send(&self, _address: &str, frame: Bytes) -> Result<(), TransportError> {
        let record = Record::decode(&frame).expect("record");
        let request = Msg::decode(&record.payload).expect("msg");
        let reply = self.reply_for(&request).await;
        let reply_record = Record::new(&record.from_id, &record.to_id, reply.encode());
        let _ = self
            .inbound
            .send(InboundFrame {
                transport: "mock",
                origin: "addr-1".to_string(),
                payload: reply_record.encode(),
            })
            .await;
        Ok(())
    }
}

struct Harness {
    ops: Arc<OpsService>,
    instances: Arc<InMemoryInstanceStore>,
}

fn harness() -> Harness {
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

    let parameters = Arc::new(InMemoryParameterStore::new());
    let instances = Arc::new(InMemoryInstanceStore::new());
    let transfers = Arc::new(InMemoryTransferStore::new());
    let subscriptions = Arc::new(InMemorySubscriptionStore::new());
    let (router, _deliveries) = SubscriptionRouter::new(subscriptions, 16);
    let router = Arc::new(router);
    let sink = PersistSink::spawn(parameters.clone(), transfers.clone(), SinkConfig::default());

    let (inbound_sender, inbound_receiver) = mpsc::channel(64);
    let agent = AgentSim::new(inbound_sender);
    let engine = UspEngine::new(
        UspEngineConfig::default(),
        registry.clone(),
        vec![agent as Arc<dyn MtpTransport>],
        router.clone(),
        sink.clone(),
    );
    engine.spawn_dispatcher(inbound_receiver);

    let usp_engine = UspDeviceEngine::new(engine, parameters.clone(), instances.clone());
    // CWMP 侧在本测试里不会被命中，给一个空壳 ACS
    let acs = dms_cwmp::AcsService::new(
        dms_cwmp::AcsConfig::default(),
        registry.clone(),
        Arc::new(dms_storage::in_memory::InMemoryDeviceStore::new()),
        transfers.clone(),
        PersistSink::spawn(parameters.clone(), transfers.clone(), SinkConfig::default()),
        router.clone(),
        Arc::new(dms_cwmp::ConnectionRequester::new(
            dms_config::ConnReqAuth::Basic,
            None,
            None,
        )),
    );
    let cwmp_engine = CwmpDeviceEngine::new(acs, parameters.clone(), instances.clone());

    let ops = OpsService::new(
        registry,
        usp_engine,
        cwmp_engine,
        Arc::new(InMemoryOperationStore::new()),
        transfers,
        Arc::new(InMemoryCacheStore::new()),
        router,
        sink,
        OpsConfig::default(),
    );
    Harness { ops, instances }
}

#[tokio::test]
async fn set_then_get_returns_written_values() {
    let harness = harness();
    let results = harness
        .ops
        .set_parameters(
            "os::agent-1",
            vec![
                SetItem {
                    path: "Device.WiFi.Radio.1.Enable".to_string(),
                    value: "true".to_string(),
                    param_type: ParamType::Boolean,
                },
                SetItem {
                    path: "Device.WiFi.Radio.1.Channel".to_string(),
                    value: "6".to_string(),
                    param_type: ParamType::Int,
                },
            ],
            false,
            None,
            None,
        )
        .await
        .expect("set");
    assert!(results.iter().all(|result| result.ok));

    let fetched = harness
        .ops
        .get_parameters(
            "os::agent-1",
            &["Device.WiFi.Radio.1.Enable".to_string(), "Device.WiFi.Radio.1.Channel".to_string()],
            None,
        )
        .await
        .expect("get");
    assert_eq!(fetched.len(), 2);
    let by_path: std::collections::HashMap<_, _> = fetched
        .iter()
        .map(|record| (record.path.as_str(), record.value.as_str()))
        .collect();
    assert_eq!(by_path["Device.WiFi.Radio.1.Enable"], "true");
    assert_eq!(by_path["Device.WiFi.Radio.1.Channel"], "6");
}

#[tokio::test]
async fn add_then_delete_leaves_object_set_unchanged() {
    let harness = harness();
    let instance = harness
        .ops
        .add_object(
            "os::agent-1",
            "Device.WiFi.SSID.",
            vec![SetItem {
                path: "Name".to_string(),
                value: "guest".to_string(),
                param_type: ParamType::String,
            }],
            None,
        )
        .await
        .expect("add");
    assert_eq!(instance, 1);
    assert_eq!(
        harness
            .instances
            .list_instances("os::agent-1", "Device.WiFi.SSID.")
            .await
            .expect("list")
            .len(),
        1
    );

    harness
        .ops
        .delete_object("os::agent-1", &format!("Device.WiFi.SSID.{}", instance), None)
        .await
        .expect("delete");

    // 对象集合回到原样
    assert!(harness
        .instances
        .list_instances("os::agent-1", "Device.WiFi.SSID.")
        .await
        .expect("list")
        .is_empty());
    let leftover = harness
        .ops
        .get_parameters("os::agent-1", &["Device.WiFi.SSID.".to_string()], None)
        .await
        .expect("get");
    assert!(leftover.is_empty());
}
