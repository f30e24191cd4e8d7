use api_contract::{FailureDto, SetParametersRequest, SubscribeRequest};
use serde_json::Value;

#[test]
fn set_parameters_request_accepts_camel_case() {
    let payload = r#"{
        "parameters": [{"path": "Device.WiFi.Radio.1.Enable", "value": "true", "type": "boolean"}],
        "atomic": true,
        "idempotencyKey": "op-1",
        "timeoutMs": 5000
    }"#;
    let req: SetParametersRequest = serde_json::from_str(payload).expect("parse");
    assert_eq!(req.parameters.len(), 1);
    assert!(req.atomic);
    assert_eq!(req.idempotency_key.as_deref(), Some("op-1"));
    assert_eq!(req.timeout_ms, Some(5000));
}

#[test]
fn subscribe_request_device_id_optional() {
    let payload = r#"{
        "eventType": "value_change",
        "pathPattern": "Device.WiFi.Radio.*.Channel",
        "deliveryTarget": "ops-queue"
    }"#;
    let req: SubscribeRequest = serde_json::from_str(payload).expect("parse");
    assert!(req.device_id.is_none());
    assert_eq!(req.event_type, "value_change");
}

#[test]
fn failure_dto_is_camel_case_and_skips_empty() {
    let failure = FailureDto {
        kind: "semantic".to_string(),
        code: Some(9008),
        message: "attempt to set non-writable parameter".to_string(),
        device_id: Some("cwmp:Acme:001122:Router:SN1".to_string()),
        path: None,
        retryable: false,
    };
    let value = serde_json::to_value(failure).expect("serialize");
    assert!(value.get("deviceId").is_some());
    assert!(value.get("device_id").is_none());
    assert_eq!(value.get("path"), None::<&Value>);
}
