use deckhand::cache::CacheStore;
use serde_json::json;
use std::fs;
use tempfile::tempdir;

#[test]
fn set_then_get_round_trips_and_survives_reopen() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("cache/steps.json");

    let mut store = CacheStore::open(&path).expect("open empty store");
    assert!(store.is_empty());
    store
        .set("fp-1", json!({"result": true}))
        .expect("set entry");
    let entry = store.get("fp-1", None).expect("entry present");
    assert_eq!(entry.output, json!({"result": true}));

    let reopened = CacheStore::open(&path).expect("reopen store");
    assert_eq!(reopened.len(), 1);
    let entry = reopened.get("fp-1", None).expect("entry survives reopen");
    assert_eq!(entry.output, json!({"result": true}));
}

#[test]
fn persisted_document_is_a_single_entries_mapping() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("steps.json");
    let mut store = CacheStore::open(&path).expect("open store");
    store.set("fp-1", json!(1)).expect("set entry");

    let raw = fs::read_to_string(&path).expect("read document");
    let document: serde_json::Value = serde_json::from_str(&raw).expect("parse document");
    assert!(document.get("entries").and_then(|v| v.get("fp-1")).is_some());
    assert!(document["entries"]["fp-1"].get("created_at").is_some());
}

#[test]
fn expired_entries_are_not_returned() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("steps.json");
    fs::write(
        &path,
        r#"{"entries": {"fp-old": {"created_at": 1000, "output": {"stale": true}}}}"#,
    )
    .expect("seed store document");

    let store = CacheStore::open(&path).expect("open seeded store");
    assert!(store.get("fp-old", Some(60_000)).is_none(), "entry expired");
    assert!(
        store.get("fp-old", None).is_some(),
        "no ttl means no expiry"
    );
}

#[test]
fn invalidate_removes_one_or_all_entries() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("steps.json");
    let mut store = CacheStore::open(&path).expect("open store");
    store.set("fp-1", json!(1)).expect("set fp-1");
    store.set("fp-2", json!(2)).expect("set fp-2");

    store.invalidate(Some("fp-1")).expect("invalidate one");
    assert!(store.get("fp-1", None).is_none());
    assert!(store.get("fp-2", None).is_some());

    store.invalidate(None).expect("invalidate all");
    assert!(store.is_empty());

    let reopened = CacheStore::open(&path).expect("reopen store");
    assert!(reopened.is_empty(), "invalidation is persisted");
}
