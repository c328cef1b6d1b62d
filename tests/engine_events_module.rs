use deckhand::engine::{EngineEvent, EngineEventKind, EventBus};
use deckhand::protocol::WorkerKind;

fn event(job_id: &str, state: &str) -> EngineEvent {
    EngineEvent {
        kind: EngineEventKind::StepProgress,
        job_id: job_id.to_string(),
        step_id: Some("transcribe".to_string()),
        worker: Some(WorkerKind::Media),
        state: state.to_string(),
        code: None,
        output: None,
        error: None,
        timing_ms: None,
    }
}

#[test]
fn every_subscriber_receives_an_owned_copy_in_order() {
    let bus = EventBus::default();
    let first = bus.subscribe();
    let second = bus.subscribe();

    bus.publish(event("job-1", "running"));
    bus.publish(event("job-1", "succeeded"));

    for rx in [&first, &second] {
        let states: Vec<String> = rx.try_iter().map(|event| event.state).collect();
        assert_eq!(states, vec!["running", "succeeded"]);
    }
}

#[test]
fn an_unread_subscriber_drops_events_instead_of_blocking() {
    let bus = EventBus::default();
    let _stalled = bus.subscribe();
    // Well past the subscriber buffer; publish must never block.
    for index in 0..5_000 {
        bus.publish(event(&format!("job-{index}"), "running"));
    }
}

#[test]
fn dropped_subscribers_are_pruned_on_publish() {
    let bus = EventBus::default();
    let live = bus.subscribe();
    drop(bus.subscribe());

    bus.publish(event("job-1", "running"));
    assert_eq!(live.try_iter().count(), 1);
}

#[test]
fn events_serialize_with_a_type_tag() {
    let serialized = serde_json::to_value(event("job-1", "running")).expect("serialize event");
    assert_eq!(serialized["type"], "step_progress");
    assert_eq!(serialized["job_id"], "job-1");
    assert_eq!(serialized["worker"], "media");
    assert!(serialized.get("timing_ms").is_none(), "absent fields are omitted");
}
