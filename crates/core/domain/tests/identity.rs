use domain::{DeviceId, DeviceKind};

#[test]
fn cwmp_canonical_round_trips() {
    let id = DeviceId::cwmp("Acme", "001122", "Router", "SN1");
    assert_eq!(id.canonical(), "cwmp:Acme:001122:Router:SN1");
    assert_eq!(DeviceId::parse(&id.canonical()), id);
    assert_eq!(id.kind(), DeviceKind::Cwmp);
}

#[test]
fn usp_endpoint_id_kept_verbatim() {
    let id = DeviceId::usp("proto::0044FF-SN42");
    assert_eq!(id.canonical(), "proto::0044FF-SN42");
    assert_eq!(DeviceId::parse("proto::0044FF-SN42"), id);
    assert_eq!(id.kind(), DeviceKind::Usp);
}

#[test]
fn malformed_cwmp_prefix_falls_back_to_usp() {
    // 段数不足时不能误判为 CPE 四元组
    let id = DeviceId::parse("cwmp:only:two");
    assert_eq!(id.kind(), DeviceKind::Usp);
}

#[test]
fn cwmp_tuple_is_sort_key() {
    let a = DeviceId::cwmp("Acme", "001122", "Router", "SN1");
    let b = DeviceId::cwmp("Acme", "001122", "Router", "SN2");
    assert!(a < b);
}
