use dms_storage::in_memory::{InMemoryDeviceStore, InMemoryParameterStore};
use dms_storage::{DeviceFilter, DeviceRecord, DeviceStore, ParameterRecord, ParameterStore};
use domain::{now_epoch_ms, DeviceId, ParamType, PathPattern};

fn sample_device() -> DeviceRecord {
    DeviceRecord::new(&DeviceId::cwmp("Acme", "001122", "Router", "SN1"))
}

fn sample_parameter(path: &str, value: &str) -> ParameterRecord {
    ParameterRecord {
        device_id: "cwmp:Acme:001122:Router:SN1".to_string(),
        path: path.to_string(),
        value: value.to_string(),
        param_type: ParamType::String,
        writable: true,
        last_update_ms: now_epoch_ms(),
    }
}

#[tokio::test]
async fn upsert_device_replaces() {
    let store = InMemoryDeviceStore::new();
    let mut device = sample_device();
    store.upsert_device(device.clone()).await.expect("insert");

    device.software_version = Some("1.2.3".to_string());
    store.upsert_device(device.clone()).await.expect("replace");

    let found = store
        .get_device(&device.device_id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(found.software_version.as_deref(), Some("1.2.3"));
}

#[tokio::test]
async fn find_devices_filters_conjunctively() {
    let store = InMemoryDeviceStore::new();
    store.upsert_device(sample_device()).await.expect("insert");
    let other = DeviceRecord::new(&DeviceId::cwmp("Globex", "334455", "Modem", "SN9"));
    store.upsert_device(other).await.expect("insert");

    let filter = DeviceFilter {
        id_prefix: Some("cwmp:".to_string()),
        manufacturer_regex: Some("^Acme$".to_string()),
        ..DeviceFilter::default()
    };
    let found = store.find_devices(&filter).await.expect("find");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].manufacturer.as_deref(), Some("Acme"));

    // 活性窗口为 0 时全部过滤掉需要时间流逝，这里只验证窗口生效路径
    let filter = DeviceFilter {
        online_within_ms: Some(60_000),
        ..DeviceFilter::default()
    };
    assert_eq!(store.find_devices(&filter).await.expect("find").len(), 2);
}

#[tokio::test]
async fn parameters_unique_per_path_and_sorted() {
    let store = InMemoryParameterStore::new();
    let device_id = "cwmp:Acme:001122:Router:SN1";
    store
        .upsert_parameters(
            device_id,
            &[
                sample_parameter("Device.WiFi.Radio.1.Enable", "true"),
                sample_parameter("Device.DeviceInfo.SoftwareVersion", "1.0"),
                sample_parameter("Device.WiFi.Radio.1.Enable", "false"),
            ],
        )
        .await
        .expect("upsert");

    let pattern = PathPattern::parse("Device.").expect("pattern");
    let all = store.get_parameters(device_id, &pattern).await.expect("get");
    // 同路径只保留最后一次写入
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].path, "Device.DeviceInfo.SoftwareVersion");
    assert_eq!(all[1].value, "false");
}

#[tokio::test]
async fn delete_by_prefix_cascades_instance_subtree() {
    let store = InMemoryParameterStore::new();
    let device_id = "agent-1";
    store
        .upsert_parameters(
            device_id,
            &[
                sample_parameter("Device.WiFi.SSID.1.Name", "main"),
                sample_parameter("Device.WiFi.SSID.1.Enable", "true"),
                sample_parameter("Device.WiFi.SSID.2.Name", "guest"),
            ],
        )
        .await
        .expect("upsert");

    let removed = store
        .delete_parameters_by_prefix(device_id, "Device.WiFi.SSID.1.")
        .await
        .expect("delete");
    assert_eq!(removed, 2);

    let pattern = PathPattern::parse("Device.WiFi.SSID.").expect("pattern");
    let rest = store.get_parameters(device_id, &pattern).await.expect("get");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].path, "Device.WiFi.SSID.2.Name");
}
