use std::collections::BTreeMap;
use std::fs;

use serde_json::json;
use snapshot_store::{state_root, SnapshotKey, SnapshotStore, SnapshotStoreError};
use tempfile::TempDir;

fn open_store() -> (TempDir, SnapshotStore) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = SnapshotStore::open(&state_root(dir.path())).expect("store should open");
    (dir, store)
}

#[test]
fn read_missing_key_returns_none() {
    let (_dir, store) = open_store();

    let value = store
        .read::<Vec<String>>(SnapshotKey::Items)
        .expect("missing snapshot is not an error");
    assert!(value.is_none());
}

#[test]
fn write_then_read_returns_saved_payload() {
    let (_dir, store) = open_store();
    let mut text = BTreeMap::new();
    text.insert("pr-1".to_string(), "Hello, world".to_string());
    text.insert("pr-2".to_string(), String::new());

    store
        .write(SnapshotKey::GeneratedText, &text)
        .expect("write should succeed");
    let loaded = store
        .read::<BTreeMap<String, String>>(SnapshotKey::GeneratedText)
        .expect("read should succeed");

    assert_eq!(loaded, Some(text));
    assert!(!store
        .path_for(SnapshotKey::GeneratedText)
        .with_extension("json.tmp")
        .exists());
}

#[test]
fn open_creates_nested_state_directory() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let root = state_root(dir.path());
    assert!(!root.exists());

    let store = SnapshotStore::open(&root).expect("store should open");
    assert!(store.root().is_dir());
}

#[test]
fn read_rejects_malformed_json() {
    let (_dir, store) = open_store();
    fs::write(store.path_for(SnapshotKey::Items), "{ not json").expect("raw write");

    let error = store
        .read::<Vec<String>>(SnapshotKey::Items)
        .expect_err("malformed json must fail");
    assert!(matches!(error, SnapshotStoreError::JsonParse { .. }));
    assert!(error.is_malformed());
}

#[test]
fn read_rejects_unsupported_version() {
    let (_dir, store) = open_store();
    let raw = json!({
        "version": 2,
        "key": "items",
        "saved_at": "2026-02-14T00:00:00Z",
        "data": [],
    });
    fs::write(store.path_for(SnapshotKey::Items), raw.to_string()).expect("raw write");

    let error = store
        .read::<Vec<String>>(SnapshotKey::Items)
        .expect_err("unsupported version must fail");
    assert!(matches!(
        error,
        SnapshotStoreError::UnsupportedVersion { found: 2, .. }
    ));
}

#[test]
fn read_rejects_envelope_stored_under_another_key() {
    let (_dir, store) = open_store();
    let raw = json!({
        "version": 1,
        "key": "visibility",
        "saved_at": "2026-02-14T00:00:00Z",
        "data": {},
    });
    fs::write(store.path_for(SnapshotKey::Pagination), raw.to_string()).expect("raw write");

    let error = store
        .read::<serde_json::Value>(SnapshotKey::Pagination)
        .expect_err("key mismatch must fail");
    assert!(matches!(
        error,
        SnapshotStoreError::KeyMismatch {
            expected: SnapshotKey::Pagination,
            found: SnapshotKey::Visibility,
            ..
        }
    ));
}

#[test]
fn read_rejects_invalid_timestamp_and_unknown_fields() {
    let (_dir, store) = open_store();
    let bad_time = json!({
        "version": 1,
        "key": "items",
        "saved_at": "yesterday",
        "data": [],
    });
    fs::write(store.path_for(SnapshotKey::Items), bad_time.to_string()).expect("raw write");
    let error = store
        .read::<Vec<String>>(SnapshotKey::Items)
        .expect_err("invalid timestamp must fail");
    assert!(matches!(error, SnapshotStoreError::InvalidTimestamp { .. }));

    let extra = json!({
        "version": 1,
        "key": "items",
        "saved_at": "2026-02-14T00:00:00Z",
        "data": [],
        "unexpected": true,
    });
    fs::write(store.path_for(SnapshotKey::Items), extra.to_string()).expect("raw write");
    let error = store
        .read::<Vec<String>>(SnapshotKey::Items)
        .expect_err("unknown envelope field must fail");
    assert!(matches!(error, SnapshotStoreError::JsonParse { .. }));
}

#[test]
fn read_reports_payload_shape_mismatch() {
    let (_dir, store) = open_store();
    store
        .write(SnapshotKey::Visibility, &json!({"pr-1": "yes"}))
        .expect("write should succeed");

    let error = store
        .read::<BTreeMap<String, bool>>(SnapshotKey::Visibility)
        .expect_err("payload shape mismatch must fail");
    assert!(matches!(
        error,
        SnapshotStoreError::PayloadDecode {
            key: SnapshotKey::Visibility,
            ..
        }
    ));
    assert!(error.is_malformed());
}

#[test]
fn write_over_quota_fails_and_keeps_previous_snapshot() {
    let (_dir, store) = open_store();
    store
        .write(SnapshotKey::GeneratedText, &json!({"pr-1": "short"}))
        .expect("first write should succeed");

    let store = store.with_quota(256);
    let error = store
        .write(SnapshotKey::GeneratedText, &json!({"pr-1": "x".repeat(1024)}))
        .expect_err("oversized write must fail");
    assert!(matches!(
        error,
        SnapshotStoreError::QuotaExceeded { limit: 256, .. }
    ));
    assert!(!error.is_malformed());

    let kept = store
        .read::<serde_json::Value>(SnapshotKey::GeneratedText)
        .expect("previous snapshot should still be readable");
    assert_eq!(kept, Some(json!({"pr-1": "short"})));
}

#[test]
fn clear_removes_every_snapshot_and_tolerates_missing_files() {
    let (_dir, store) = open_store();
    store
        .write(SnapshotKey::Items, &json!([]))
        .expect("write should succeed");
    store
        .write(SnapshotKey::Pagination, &json!({"cursor": null, "current_page": 0}))
        .expect("write should succeed");
    fs::write(store.root().join("notes.txt"), "keep me").expect("raw write");

    store.clear().expect("clear should succeed");

    for key in SnapshotKey::ALL {
        assert!(!store.contains(key), "{key} should be removed");
    }
    assert!(store.root().join("notes.txt").exists());
    store.clear().expect("clearing twice is a no-op");
}
