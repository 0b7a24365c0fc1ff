//! Integration tests for context propagation and per-view batching against the
//! in-memory core.

use replay_bridge::replay::{
    segments_from_batch, Configuration, SessionReplayFeature, FEATURE_NAME, HAS_REPLAY_KEY,
    RECORDS_COUNT_KEY,
};
use replay_bridge::telemetry::{InMemoryCore, TelemetryCore, TrackingConsent};
use replay_bridge::RumContext;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn enabled_feature() -> (Arc<InMemoryCore>, Arc<SessionReplayFeature>) {
    let memory = InMemoryCore::new("flutter");
    let core: Arc<dyn TelemetryCore> = memory.clone();
    let feature = SessionReplayFeature::enable(Configuration::default(), &core).unwrap();
    (memory, feature)
}

fn record_json(view_id: &str, timestamp: i64, full_snapshot: bool) -> String {
    let record_type = if full_snapshot { 2 } else { 3 };
    json!({
        "records": [{ "type": record_type, "timestamp": timestamp }],
        "applicationID": "app",
        "sessionID": "s1",
        "viewID": view_id,
        "hasFullSnapshot": full_snapshot,
        "earliestTimestamp": timestamp,
        "latestTimestamp": timestamp,
    })
    .to_string()
}

fn recorded_views(feature: &SessionReplayFeature) -> Arc<Mutex<Vec<Option<String>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    feature.observe_context(move |context: Option<&RumContext>| {
        sink.lock()
            .unwrap()
            .push(context.and_then(|c| c.view_id.clone()));
    });
    seen
}

#[test]
fn repeated_context_notifies_once() {
    let (memory, feature) = enabled_feature();
    let seen = recorded_views(&feature);

    memory.update_rum_context(Some(&RumContext::new("app", "s1", Some("v1"))));
    memory.update_rum_context(Some(&RumContext::new("app", "s1", Some("v1"))));
    assert_eq!(seen.lock().unwrap().len(), 1);

    memory.update_rum_context(Some(&RumContext::new("app", "s1", Some("v2"))));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some("v1".to_string()), Some("v2".to_string())]
    );
}

#[test]
fn unrelated_baggage_changes_do_not_notify() {
    let (memory, feature) = enabled_feature();
    let seen = recorded_views(&feature);

    memory.update_rum_context(Some(&RumContext::new("app", "s1", Some("v1"))));
    memory.update_context([("user".to_string(), Some(json!({ "id": "u1" })))]);
    memory.update_context([("user".to_string(), Some(json!({ "id": "u2" })))]);

    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn malformed_rum_baggage_reports_and_reads_as_absent() {
    let (memory, feature) = enabled_feature();
    let seen = recorded_views(&feature);

    memory.update_rum_context(Some(&RumContext::new("app", "s1", Some("v1"))));
    memory.update_context([(RumContext::KEY.to_string(), Some(json!({ "sessionID": 7 })))]);

    assert_eq!(memory.diagnostics().len(), 1);
    assert_eq!(
        memory.diagnostics()[0].message,
        "Fails to decode RUM context from Session Replay"
    );
    assert_eq!(*seen.lock().unwrap(), vec![Some("v1".to_string()), None]);
    assert_eq!(memory.baggage(HAS_REPLAY_KEY), Some(Value::Bool(false)));
}

#[test]
fn view_change_forces_new_batch() {
    let (memory, feature) = enabled_feature();

    feature.writer().write(&record_json("v1", 100, true), "v1");
    feature.writer().write(&record_json("v1", 200, false), "v1");
    feature.writer().write(&record_json("v2", 300, true), "v2");

    let batches = memory.batches(FEATURE_NAME);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].events.len(), 2);
    assert_eq!(batches[1].events.len(), 1);
    assert_eq!(feature.writer().last_view_id().as_deref(), Some("v2"));
}

#[test]
fn batches_decode_into_one_segment_per_view() {
    let (memory, feature) = enabled_feature();

    for (view_id, timestamp, full) in [("v1", 100, true), ("v1", 250, false), ("v2", 300, true)] {
        feature.writer().write(&record_json(view_id, timestamp, full), view_id);
    }

    let batches = memory.batches(FEATURE_NAME);
    let first = segments_from_batch(&batches[0].events, "flutter");
    assert_eq!(first.len(), 1);

    let segment = first[0].to_json().unwrap();
    assert_eq!(segment["view"]["id"], "v1");
    assert_eq!(segment["start"], 100);
    assert_eq!(segment["end"], 250);
    assert_eq!(segment["has_full_snapshot"], true);
    assert_eq!(segment["records_count"], 2);
    assert_eq!(segment["source"], "flutter");

    let second = segments_from_batch(&batches[1].events, "flutter");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].view.id, "v2");
}

#[test]
fn writes_without_consent_are_dropped_but_tracked() {
    let (memory, feature) = enabled_feature();
    memory.set_tracking_consent(TrackingConsent::NotGranted);

    feature.writer().write(&record_json("v1", 100, true), "v1");
    assert!(memory.batches(FEATURE_NAME).is_empty());
    assert_eq!(feature.writer().last_view_id().as_deref(), Some("v1"));

    memory.set_tracking_consent(TrackingConsent::Granted);
    feature.writer().write(&record_json("v2", 200, true), "v2");
    assert_eq!(memory.batches(FEATURE_NAME).len(), 1);
}

#[test]
fn record_counts_are_published_as_baggage() {
    let (memory, feature) = enabled_feature();

    feature.set_has_replay(true);
    feature.set_record_count("v1", 3);
    feature.set_record_count("v2", 1);

    assert_eq!(memory.baggage(HAS_REPLAY_KEY), Some(json!(true)));
    assert_eq!(
        memory.baggage(RECORDS_COUNT_KEY),
        Some(json!({ "v1": 3, "v2": 1 }))
    );
}
