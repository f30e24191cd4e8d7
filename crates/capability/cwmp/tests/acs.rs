//! ACS 会话引擎端到端测试：自举、跨会话放送、故障语义。

use dms_cwmp::{
    AcsConfig, AcsRequest, AcsRpc, AcsService, ConnectionRequester, ParameterValue, RpcOutcome,
};
use dms_pipeline::{PersistSink, SinkConfig};
use dms_registry::DeviceRegistry;
use dms_storage::in_memory::{
    InMemoryDeviceStore, InMemoryParameterStore, InMemorySubscriptionStore, InMemoryTransferStore,
};
use dms_storage::{
    DeviceStore, ParameterStore, SubscriptionRecord, SubscriptionStore, TransferRecord,
    TransferStore,
};
use dms_usp::{event_types, SubscriptionRouter};
use domain::{now_epoch_ms, PathPattern};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    acs: Arc<AcsService>,
    registry: Arc<DeviceRegistry>,
    devices: Arc<InMemoryDeviceStore>,
    parameters: Arc<InMemoryParameterStore>,
    transfers: Arc<InMemoryTransferStore>,
    subscriptions: Arc<InMemorySubscriptionStore>,
    deliveries: tokio::sync::mpsc::Receiver<dms_usp::DeliveryTask>,
}

fn harness() -> Harness {
    harness_with(AcsConfig::default())
}

fn harness_with(config: AcsConfig) -> Harness {
    let registry = Arc::new(DeviceRegistry::new(300_000));
    let devices = Arc::new(InMemoryDeviceStore::new());
    let parameters = Arc::new(InMemoryParameterStore::new());
    let transfers = Arc::new(InMemoryTransferStore::new());
    let subscriptions = Arc::new(InMemorySubscriptionStore::new());
    let (router, deliveries) = SubscriptionRouter::new(subscriptions.clone(), 64);
    let sink = PersistSink::spawn(
        parameters.clone(),
        transfers.clone(),
        SinkConfig {
            workers: 1,
            ..SinkConfig::default()
        },
    );
    let requester = Arc::new(ConnectionRequester::new(
        dms_config::ConnReqAuth::Basic,
        None,
        None,
    ));
    let acs = AcsService::new(
        config,
        registry.clone(),
        devices.clone(),
        transfers.clone(),
        sink,
        Arc::new(router),
        requester,
    );
    Harness {
        acs,
        registry,
        devices,
        parameters,
        transfers,
        subscriptions,
        deliveries,
    }
}

const DEVICE_ID: &str = "cwmp:Acme:001122:Router:SN1";

fn inform_body(event: &str, params: &[(&str, &str)]) -> String {
    let mut list = String::new();
    for (name, value) in params {
        list.push_str(&format!(
            "<ParameterValueStruct><Name>{}</Name><Value type=\"xsd:string\">{}</Value></ParameterValueStruct>",
            name, value
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
  <soap:Header><cwmp:ID soap:mustUnderstand="1">1</cwmp:ID></soap:Header>
  <soap:Body><cwmp:Inform>
    <DeviceId>
      <Manufacturer>Acme</Manufacturer><OUI>001122</OUI>
      <ProductClass>Router</ProductClass><SerialNumber>SN1</SerialNumber>
    </DeviceId>
    <Event><EventStruct><EventCode>{}</EventCode><CommandKey></CommandKey></EventStruct></Event>
    <MaxEnvelopes>1</MaxEnvelopes>
    <CurrentTime>2024-05-01T10:00:00Z</CurrentTime>
    <RetryCount>0</RetryCount>
    <ParameterList>{}</ParameterList>
  </cwmp:Inform></soap:Body>
</soap:Envelope>"#,
        event, list
    )
}

fn response_body(inner: &str) -> String {
    format!(
        r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
  <soap:Body>{}</soap:Body>
</soap:Envelope>"#,
        inner
    )
}

fn request(body: &str, cookie: Option<&str>) -> AcsRequest {
    AcsRequest {
        body: body.to_string(),
        cookie_header: cookie.map(|value| format!("CWMPSESSIONID={}", value)),
        authorization: None,
        peer_ip: Some("10.0.0.2".to_string()),
        uri: "/".to_string(),
    }
}

fn cookie_of(response: &dms_cwmp::AcsResponse) -> String {
    let set_cookie = response.set_cookie.as_deref().expect("set-cookie");
    set_cookie
        .strip_prefix("CWMPSESSIONID=")
        .and_then(|rest| rest.split(';').next())
        .expect("session id")
        .to_string()
}

#[tokio::test]
async fn bootstrap_registers_device_and_stores_parameters() {
    let harness = harness();
    let body = inform_body(
        "0 BOOTSTRAP",
        &[("Device.DeviceInfo.SoftwareVersion", "1.2.3")],
    );
    let response = harness.acs.handle(request(&body, None)).await;

    assert_eq!(response.status, 200);
    let response_xml = response.body.as_deref().expect("body");
    assert!(response_xml.contains("InformResponse"));
    assert!(response_xml.contains("<MaxEnvelopes>1</MaxEnvelopes>"));
    // cwmp:ID 原样回显
    assert!(response_xml.contains(">1</cwmp:ID>"));
    let cookie = cookie_of(&response);

    // 设备已注册且在线
    let device = harness.registry.get(DEVICE_ID).expect("registered");
    assert!(device.is_online());
    assert_eq!(
        device.descriptor().software_version.as_deref(),
        Some("1.2.3")
    );
    // 设备记录已落库
    let record = harness
        .devices
        .get_device(DEVICE_ID)
        .await
        .expect("lookup")
        .expect("stored");
    assert!(record.last_bootstrap_ms.is_some());

    // 参数异步落库
    tokio::time::sleep(Duration::from_millis(100)).await;
    let pattern = PathPattern::parse("Device.DeviceInfo.SoftwareVersion").unwrap();
    let stored = harness
        .parameters
        .get_parameters(DEVICE_ID, &pattern)
        .await
        .expect("params");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].value, "1.2.3");

    // 无排队 RPC：空 POST 得 204，会话收掉
    let done = harness.acs.handle(request("", Some(&cookie))).await;
    assert_eq!(done.status, 204);
    assert_eq!(harness.acs.open_sessions(), 0);
}

#[tokio::test]
async fn queued_set_drains_over_next_session_exactly_once() {
    let harness = harness();
    // 第一个会话：注册设备，随即收掉
    let response = harness
        .acs
        .handle(request(&inform_body("0 BOOTSTRAP", &[]), None))
        .await;
    let cookie = cookie_of(&response);
    harness.acs.handle(request("", Some(&cookie))).await;

    // 设备"离线"期间操作员排队一条 Set
    let receiver = harness
        .acs
        .enqueue_rpc(
            DEVICE_ID,
            AcsRpc::SetParameterValues {
                params: vec![ParameterValue {
                    name: "Device.WiFi.Radio.1.Enable".to_string(),
                    value: "true".to_string(),
                    param_type: "xsd:boolean".to_string(),
                }],
                parameter_key: "op-1".to_string(),
            },
        )
        .await
        .expect("enqueue");
    assert_eq!(harness.acs.queue_depth(DEVICE_ID), 1);

    // 设备开新会话
    let response = harness
        .acs
        .handle(request(&inform_body("1 BOOT", &[]), None))
        .await;
    let cookie = cookie_of(&response);

    // 第一个空 POST 收到 SetParameterValues 信封
    let rpc = harness.acs.handle(request("", Some(&cookie))).await;
    assert_eq!(rpc.status, 200);
    let rpc_xml = rpc.body.as_deref().expect("rpc body");
    assert!(rpc_xml.contains("cwmp:SetParameterValues"));
    assert!(rpc_xml.contains("Device.WiFi.Radio.1.Enable"));

    // 设备应答 Status=0 → 操作员的等待恰好完成一次
    let done = harness
        .acs
        .handle(request(
            &response_body("<cwmp:SetParameterValuesResponse><Status>0</Status></cwmp:SetParameterValuesResponse>"),
            Some(&cookie),
        ))
        .await;
    assert_eq!(done.status, 204);

    let outcome = tokio::time::timeout(Duration::from_secs(1), receiver)
        .await
        .expect("resolved")
        .expect("sent");
    match outcome {
        RpcOutcome::Response(dms_cwmp::CpeMessage::SetParameterValuesResponse { status }) => {
            assert_eq!(status, 0);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(harness.acs.queue_depth(DEVICE_ID), 0);
}

#[tokio::test]
async fn oversized_envelope_gets_fault_9004() {
    let harness = harness_with(AcsConfig {
        max_envelope_size: 128,
        ..AcsConfig::default()
    });
    let body = inform_body("2 PERIODIC", &[]);
    assert!(body.len() > 128);
    let response = harness.acs.handle(request(&body, None)).await;
    assert_eq!(response.status, 200);
    let xml = response.body.as_deref().expect("fault body");
    assert!(xml.contains("<FaultCode>9004</FaultCode>"));
}

#[tokio::test]
async fn replaced_session_fails_inflight_but_keeps_queue() {
    let harness = harness();
    let response = harness
        .acs
        .handle(request(&inform_body("0 BOOTSTRAP", &[]), None))
        .await;
    let cookie = cookie_of(&response);
    harness.acs.handle(request("", Some(&cookie))).await;

    let reboot = |key: &str| AcsRpc::Reboot {
        command_key: key.to_string(),
    };
    let first = harness
        .acs
        .enqueue_rpc(DEVICE_ID, reboot("ck-1"))
        .await
        .expect("enqueue");
    let second = harness
        .acs
        .enqueue_rpc(DEVICE_ID, reboot("ck-2"))
        .await
        .expect("enqueue");

    // 新会话：第一条 RPC 上线
    let response = harness
        .acs
        .handle(request(&inform_body("1 BOOT", &[]), None))
        .await;
    let cookie = cookie_of(&response);
    let rpc = harness.acs.handle(request("", Some(&cookie))).await;
    assert!(rpc.body.as_deref().expect("rpc").contains("ck-1"));

    // 设备中途重开会话：在途的失败（session_lost），排队的保留
    let response = harness
        .acs
        .handle(request(&inform_body("1 BOOT", &[]), None))
        .await;
    let new_cookie = cookie_of(&response);

    let outcome = tokio::time::timeout(Duration::from_secs(1), first)
        .await
        .expect("resolved")
        .expect("sent");
    assert!(matches!(outcome, RpcOutcome::SessionLost));

    // 新会话继续放送第二条
    let rpc = harness.acs.handle(request("", Some(&new_cookie))).await;
    assert!(rpc.body.as_deref().expect("rpc").contains("ck-2"));
    let done = harness
        .acs
        .handle(request(
            &response_body("<cwmp:RebootResponse></cwmp:RebootResponse>"),
            Some(&new_cookie),
        ))
        .await;
    assert_eq!(done.status, 204);
    let outcome = tokio::time::timeout(Duration::from_secs(1), second)
        .await
        .expect("resolved")
        .expect("sent");
    assert!(matches!(
        outcome,
        RpcOutcome::Response(dms_cwmp::CpeMessage::RebootResponse)
    ));
}

#[tokio::test]
async fn cwmp_fault_fails_one_rpc_and_session_proceeds() {
    let harness = harness();
    let response = harness
        .acs
        .handle(request(&inform_body("0 BOOTSTRAP", &[]), None))
        .await;
    let cookie = cookie_of(&response);
    harness.acs.handle(request("", Some(&cookie))).await;

    let first = harness
        .acs
        .enqueue_rpc(
            DEVICE_ID,
            AcsRpc::SetParameterValues {
                params: vec![ParameterValue {
                    name: "Device.DeviceInfo.SerialNumber".to_string(),
                    value: "x".to_string(),
                    param_type: "xsd:string".to_string(),
                }],
                parameter_key: "op-1".to_string(),
            },
        )
        .await
        .expect("enqueue");
    let second = harness
        .acs
        .enqueue_rpc(
            DEVICE_ID,
            AcsRpc::Reboot {
                command_key: "ck-9".to_string(),
            },
        )
        .await
        .expect("enqueue");

    let response = harness
        .acs
        .handle(request(&inform_body("1 BOOT", &[]), None))
        .await;
    let cookie = cookie_of(&response);
    harness.acs.handle(request("", Some(&cookie))).await;

    // 设备对第一条回 9008 Fault：该操作失败，会话继续放第二条
    let fault_body = response_body(
        r#"<soap:Fault><faultcode>Client</faultcode><faultstring>CWMP fault</faultstring>
           <detail><cwmp:Fault><FaultCode>9008</FaultCode><FaultString>non-writable</FaultString></cwmp:Fault></detail>
           </soap:Fault>"#,
    );
    let next = harness.acs.handle(request(&fault_body, Some(&cookie))).await;
    assert!(next.body.as_deref().expect("next rpc").contains("cwmp:Reboot"));

    let outcome = tokio::time::timeout(Duration::from_secs(1), first)
        .await
        .expect("resolved")
        .expect("sent");
    match outcome {
        RpcOutcome::Fault { code, text } => {
            assert_eq!(code, 9008);
            assert_eq!(text, "non-writable");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    drop(second);
}

#[tokio::test]
async fn identity_conflict_rejected_and_first_device_unchanged() {
    let harness = harness();
    let first = inform_body("0 BOOTSTRAP", &[("Device.DeviceInfo.ModelName", "R1")]);
    let response = harness.acs.handle(request(&first, None)).await;
    assert!(response.body.as_deref().expect("ok").contains("InformResponse"));
    let cookie = cookie_of(&response);
    harness.acs.handle(request("", Some(&cookie))).await;

    // 同一四元组、分歧的 ModelName：拒绝注册
    let second = inform_body("0 BOOTSTRAP", &[("Device.DeviceInfo.ModelName", "R2")]);
    let response = harness.acs.handle(request(&second, None)).await;
    let xml = response.body.as_deref().expect("fault");
    assert!(xml.contains("<FaultCode>9001</FaultCode>"));

    let device = harness.registry.get(DEVICE_ID).expect("still there");
    assert_eq!(device.descriptor().model_name.as_deref(), Some("R1"));
}

#[tokio::test]
async fn transfer_complete_correlates_by_command_key_and_fires_subscription() {
    let mut harness = harness();
    // 预置一条已调度的传输
    harness
        .transfers
        .create_transfer(TransferRecord {
            device_id: DEVICE_ID.to_string(),
            command_key: "dl-1".to_string(),
            direction: "download".to_string(),
            url: "http://files/fw.img".to_string(),
            file_type: "1 Firmware Upgrade Image".to_string(),
            username: None,
            password: None,
            file_size: None,
            target_file_name: None,
            delay_seconds: 0,
            status: "scheduled".to_string(),
            started_at_ms: Some(now_epoch_ms()),
            completed_at_ms: None,
            fault: None,
        })
        .await
        .expect("seed transfer");
    harness
        .subscriptions
        .save_subscription(SubscriptionRecord {
            subscription_id: "sub-t".to_string(),
            device_id: Some(DEVICE_ID.to_string()),
            event_type: event_types::TRANSFER_COMPLETE.to_string(),
            path_pattern: "Device.".to_string(),
            delivery_target: "ops".to_string(),
            status: "active".to_string(),
            created_at_ms: now_epoch_ms(),
            last_delivery_ms: None,
        })
        .await
        .expect("subscribe");

    let response = harness
        .acs
        .handle(request(&inform_body("7 TRANSFER COMPLETE", &[]), None))
        .await;
    let cookie = cookie_of(&response);

    let transfer_complete = response_body(
        r#"<cwmp:TransferComplete>
            <CommandKey>dl-1</CommandKey>
            <FaultStruct><FaultCode>0</FaultCode><FaultString></FaultString></FaultStruct>
            <StartTime>2024-05-01T10:00:00Z</StartTime>
            <CompleteTime>2024-05-01T10:05:00Z</CompleteTime>
           </cwmp:TransferComplete>"#,
    );
    let response = harness
        .acs
        .handle(request(&transfer_complete, Some(&cookie)))
        .await;
    assert!(response
        .body
        .as_deref()
        .expect("resp")
        .contains("TransferCompleteResponse"));

    // 传输终态 + 订阅投递
    tokio::time::sleep(Duration::from_millis(100)).await;
    let transfer = harness
        .transfers
        .find_transfer(DEVICE_ID, "dl-1")
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(transfer.status, "completed");

    let task = tokio::time::timeout(Duration::from_secs(1), harness.deliveries.recv())
        .await
        .expect("delivered")
        .expect("task");
    assert_eq!(task.event_type, event_types::TRANSFER_COMPLETE);
}
