use dms_telemetry::{metrics, new_request_ids, record_orphan_response};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
}

#[test]
fn orphan_counter_increments() {
    let before = metrics().snapshot().orphan_responses;
    record_orphan_response();
    assert!(metrics().snapshot().orphan_responses > before);
}
