use std::sync::Arc;

use dx_mirror::storage::REV_FIELD;
use dx_mirror::{from_document_store, DocumentMirror, DocumentStore, SqliteStore};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

fn open(key: &str, store: Arc<dyn DocumentStore>) -> DocumentMirror {
    let slot = Arc::new(Mutex::new(None));
    let out = slot.clone();
    from_document_store(key, store, move |loaded| *out.lock() = Some(loaded));
    let loaded = slot.lock().take().expect("sqlite store answers inline");
    loaded.unwrap()
}

#[test]
fn document_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.db");

    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let mirror = open("monitor-test", store);
        mirror.tree().set_property("a", json!(6), None).unwrap();
        mirror.tree().set_property("nested", json!({"list": [1, 2]}), None).unwrap();
        mirror.tree().child("nested").unwrap().child("list").unwrap().push(json!(3)).unwrap();
    }

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let reopened = open("monitor-test", store.clone());
    assert_eq!(reopened.tree().get("a"), Some(json!(6)));
    assert_eq!(
        reopened.tree().get("nested"),
        Some(json!({"list": [1, 2, 3]}))
    );
    let rev = reopened.tree().get(REV_FIELD).unwrap();
    assert!(rev.as_str().unwrap().starts_with("3-"));
    assert_eq!(store.revision("monitor-test").unwrap().as_deref(), rev.as_str());
}

#[test]
fn revision_updates_do_not_trigger_writes() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let mirror = open("counter", store.clone());

    for n in 1..=3 {
        mirror.tree().set_property("n", json!(n), None).unwrap();
    }

    let rev = store.revision("counter").unwrap().unwrap();
    assert!(rev.starts_with("3-"), "unexpected revision {rev}");
    assert_eq!(mirror.tree().get(REV_FIELD), Some(json!(rev)));
}
