use deckhand::protocol::{
    normalize_response, to_request_envelope, to_wire_line, WorkerKind, WorkerReply,
};
use deckhand::shared::FaultCategory;
use serde_json::{json, Value};

#[test]
fn bare_command_name_canonicalizes_with_fresh_ids() {
    let env = to_request_envelope(&json!("transcribe_folder"), None).expect("envelope");
    assert_eq!(env.cmd, "transcribe_folder");
    assert_eq!(env.worker, WorkerKind::Media);
    assert!(!env.id.is_empty());
    assert!(!env.trace_id.is_empty());
    assert!(env.payload.is_empty());
}

#[test]
fn extra_top_level_fields_fold_into_payload_and_win_over_explicit_payload() {
    let raw = json!({
        "cmd": "transcribe_folder",
        "payload": {"folder_path": "/media/a", "use_gpu": true},
        "folder_path": "/media/b",
        "language": "en",
    });
    let env = to_request_envelope(&raw, None).expect("envelope");
    assert_eq!(env.payload.get("folder_path"), Some(&json!("/media/b")));
    assert_eq!(env.payload.get("use_gpu"), Some(&json!(true)));
    assert_eq!(env.payload.get("language"), Some(&json!("en")));
}

#[test]
fn worker_resolution_prefers_hint_then_declared_then_owner() {
    let raw = json!({"cmd": "transcribe_folder", "worker": "resolve"});
    let hinted =
        to_request_envelope(&raw, Some(WorkerKind::Platform)).expect("hinted envelope");
    assert_eq!(hinted.worker, WorkerKind::Platform);

    let declared = to_request_envelope(&raw, None).expect("declared envelope");
    assert_eq!(declared.worker, WorkerKind::Resolve);

    let owned = to_request_envelope(&json!({"cmd": "transcribe_folder"}), None)
        .expect("owner envelope");
    assert_eq!(owned.worker, WorkerKind::Media);
}

#[test]
fn caller_supplied_ids_are_preserved() {
    let raw = json!({"cmd": "ping", "worker": "media", "id": "req-1", "trace_id": "trace-1"});
    let env = to_request_envelope(&raw, None).expect("envelope");
    assert_eq!(env.id, "req-1");
    assert_eq!(env.trace_id, "trace-1");
}

#[test]
fn unknown_command_without_worker_is_rejected() {
    let err = to_request_envelope(&json!({"cmd": "defragment"}), None)
        .expect_err("unroutable command");
    assert_eq!(err.category, FaultCategory::User);
}

#[test]
fn wire_line_flattens_payload_at_top_level() {
    let env = to_request_envelope(
        &json!({"cmd": "transcribe_folder", "folder_path": "/media/a", "id": "req-9", "trace_id": "t-9"}),
        None,
    )
    .expect("envelope");
    let wire: Value = serde_json::from_str(&to_wire_line(&env)).expect("wire json");
    assert_eq!(wire.get("id"), Some(&json!("req-9")));
    assert_eq!(wire.get("cmd"), Some(&json!("transcribe_folder")));
    assert_eq!(wire.get("trace_id"), Some(&json!("t-9")));
    assert_eq!(wire.get("folder_path"), Some(&json!("/media/a")));
    assert!(wire.get("payload").is_none());
}

#[test]
fn event_messages_classify_without_consuming_an_id() {
    let raw = json!({
        "event": "progress",
        "trace_id": "t-1",
        "code": "STEP_PROGRESS",
        "data": {"percent": 40},
    });
    match normalize_response(&raw, Some("req-1"), None) {
        WorkerReply::Event(event) => {
            assert_eq!(event.event, "progress");
            assert_eq!(event.code.as_deref(), Some("STEP_PROGRESS"));
            assert_eq!(event.trace_id.as_deref(), Some("t-1"));
        }
        WorkerReply::Response(_) => panic!("expected event envelope"),
    }
}

#[test]
fn failed_responses_normalize_error_category() {
    let raw = json!({"id": "req-2", "ok": false, "error": {"category": "retryable", "message": "busy"}});
    match normalize_response(&raw, None, None) {
        WorkerReply::Response(response) => {
            assert!(!response.ok);
            let error = response.error.expect("error");
            assert_eq!(error.category, FaultCategory::Retryable);
            assert_eq!(error.message, "busy");
        }
        WorkerReply::Event(_) => panic!("expected response envelope"),
    }
}

#[test]
fn bare_string_errors_default_to_user_category() {
    let raw = json!({"id": "req-3", "ok": false, "error": "bad folder"});
    match normalize_response(&raw, None, None) {
        WorkerReply::Response(response) => {
            let error = response.error.expect("error");
            assert_eq!(error.category, FaultCategory::User);
            assert_eq!(error.message, "bad folder");
        }
        WorkerReply::Event(_) => panic!("expected response envelope"),
    }
}

#[test]
fn legacy_success_uses_whole_object_as_data() {
    let raw = json!({"id": "req-4", "ok": true, "result": true, "jobs": [1, 2]});
    match normalize_response(&raw, None, None) {
        WorkerReply::Response(response) => {
            assert!(response.ok);
            let data = response.data.expect("data");
            assert_eq!(data.get("result"), Some(&json!(true)));
            assert_eq!(data.get("jobs"), Some(&json!([1, 2])));
        }
        WorkerReply::Event(_) => panic!("expected response envelope"),
    }
}

#[test]
fn response_echo_round_trips_id_and_data() {
    let data = json!({"outputs": [{"file": "/a.wav"}], "files_processed": 1});
    let raw = json!({"id": "req-5", "ok": true, "data": data});
    match normalize_response(&raw, Some("req-5"), None) {
        WorkerReply::Response(response) => {
            assert_eq!(response.id.as_deref(), Some("req-5"));
            assert!(response.ok);
            assert_eq!(response.data, Some(data));
        }
        WorkerReply::Event(_) => panic!("expected response envelope"),
    }
}

#[test]
fn latency_metric_is_attached_when_start_time_is_known() {
    let raw = json!({"id": "req-6", "ok": true, "data": {}});
    let started = deckhand::shared::now_millis() - 25;
    match normalize_response(&raw, None, Some(started)) {
        WorkerReply::Response(response) => {
            let metrics = response.metrics.expect("metrics");
            let latency = metrics
                .get("latency_ms")
                .and_then(Value::as_i64)
                .expect("latency_ms");
            assert!(latency >= 25, "latency should cover the elapsed time");
        }
        WorkerReply::Event(_) => panic!("expected response envelope"),
    }
}

#[test]
fn missing_id_falls_back_to_expected_id() {
    let raw = json!({"ok": true, "data": {"status": "ok"}});
    match normalize_response(&raw, Some("req-7"), None) {
        WorkerReply::Response(response) => {
            assert_eq!(response.id.as_deref(), Some("req-7"));
        }
        WorkerReply::Event(_) => panic!("expected response envelope"),
    }
}
