use std::sync::Arc;

use dx_mirror::{
    synced_copy, wrap_tree, Action, ChangeEvent, MemoryTransport, MonitoredTree, PathKey, Role, SyncPool,
    TransactionId,
};
use parking_lot::Mutex;
use serde_json::json;

fn setup(pool_id: &str) -> (SyncPool, SyncPool) {
    let (server_end, client_end) = MemoryTransport::pair();
    let server = SyncPool::new(Arc::new(server_end), Role::Server, pool_id);
    let client = SyncPool::new(Arc::new(client_end), Role::Client, pool_id);
    (server, client)
}

#[test]
fn pool_handshake() {
    let (server_end, client_end) = MemoryTransport::pair();
    let server = SyncPool::new(Arc::new(server_end), Role::Server, "server-side");
    let ids = Arc::new(Mutex::new(Vec::new()));
    let log = ids.clone();
    let _sub = server.on_pool_init(move |id| log.lock().push(id.clone()));

    let client = SyncPool::new(Arc::new(client_end), Role::Client, "clientId123");
    assert_eq!(client.role(), Role::Client);
    assert_eq!(*ids.lock(), vec!["clientId123".to_string()]);
}

#[test]
fn object_pool_create() {
    let (server, client) = setup("clientId123");
    let client_obj: Arc<Mutex<Option<MonitoredTree>>> = Arc::new(Mutex::new(None));

    let slot = client_obj.clone();
    let _sub = client.on_create(move |created| {
        assert_eq!(created.name, "deathStar");
        assert_eq!(created.obj.raw(), json!({"workers": 1000}));
        created.obj.set_property("destroyed", json!(true), None).unwrap();
        *slot.lock() = Some(created.obj.clone());
    });

    let death_star = server.create("deathStar", json!({"workers": 1000}), true).unwrap();
    assert_eq!(death_star.get("destroyed"), Some(json!(true)));

    let mirrored = client_obj.lock().clone().unwrap();
    let seen_by = Arc::new(Mutex::new(Vec::new()));
    let log = seen_by.clone();
    let _watch = mirrored.on_change(move |change: &ChangeEvent| {
        if change.path[0].to_string() == "destroyedBy" {
            log.lock().push(change.value.clone());
        }
    });

    death_star.set_property("destroyedBy", json!("Han Solo"), None).unwrap();
    assert_eq!(mirrored.get("destroyedBy"), Some(json!("Han Solo")));
    assert_eq!(*seen_by.lock(), vec![Some(json!("Han Solo"))]);

    death_star.delete_property("destroyedBy", None);
    assert_eq!(mirrored.get("destroyedBy"), None);
    assert_eq!(mirrored.raw(), death_star.raw());
}

#[test]
fn object_propagation() {
    let (server, client) = setup("p1");
    let created = Arc::new(Mutex::new(Vec::new()));
    let log = created.clone();
    let _sub = client.on_create(move |event| {
        log.lock().push((event.name.clone(), event.obj.get("count")));
    });

    let widget = server.create("widget", json!({"count": 1}), true).unwrap();
    assert_eq!(*created.lock(), vec![("widget".to_string(), Some(json!(1)))]);

    widget.set_property("count", json!(2), None).unwrap();
    assert_eq!(client.get("widget").unwrap().get("count"), Some(json!(2)));
}

#[test]
fn nested_and_array_changes_cross_the_pool() {
    let (server, client) = setup("p1");
    let doc = server
        .create("doc", json!({"c": {"w": {"alpha": "a"}, "z": [1, 2, 3]}}), false)
        .unwrap();
    let mirrored = client.get("doc").unwrap();

    doc.child("c").unwrap().child("w").unwrap().set_property("alpha", json!("g"), None).unwrap();
    doc.child("c").unwrap().child("z").unwrap().push(json!(4)).unwrap();
    doc.child("c").unwrap().child("z").unwrap().set_property(0usize, json!(10), None).unwrap();

    assert_eq!(
        mirrored.raw(),
        json!({"c": {"w": {"alpha": "g"}, "z": [10, 2, 3, 4]}})
    );
}

#[test]
fn duplicate_delivery_is_idempotent() {
    let (server, client) = setup("p1");
    let widget = server.create("widget", json!({"n": 0}), false).unwrap();
    let link = client.link("widget").unwrap();

    let changes = Arc::new(Mutex::new(0));
    let count = changes.clone();
    let _sub = link.tree().on_change(move |_| *count.lock() += 1);

    let tx = TransactionId::new();
    widget.set_property("n", json!(1), Some(tx.clone())).unwrap();
    link.update_target(&[PathKey::from("n")], Action::Set, Some(json!(1)), Some(tx))
        .unwrap();

    assert_eq!(link.tree().get("n"), Some(json!(1)));
    assert_eq!(*changes.lock(), 1);
}

#[test]
fn delete_semantics() {
    let tree = wrap_tree(json!({"present": 1}), false).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let log = events.clone();
    let _sub = tree.on_change(move |change| log.lock().push(change.clone()));

    assert!(!tree.delete_property("absent", None));
    assert!(events.lock().is_empty());

    assert!(tree.delete_property("present", None));
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, Action::Delete);
    assert_eq!(tree.raw(), json!({}));
}

#[test]
fn assignments() {
    let obj = json!({
        "a": 1,
        "b": 2,
        "c": {
            "w": {"alpha": "a", "beta": "b"},
            "x": "x",
            "y": "y",
            "z": [1, 2, 3]
        }
    });
    let m_arr = wrap_tree(json!([1, 2, 3]), true).unwrap();
    let m_obj = wrap_tree(obj, true).unwrap();
    let target = synced_copy(&m_obj);

    m_obj.assign("b", json!(5)).unwrap();
    assert_eq!(m_obj.get("a"), Some(json!(1)));
    assert_eq!(m_obj.get("b"), Some(json!(5)));

    m_arr.assign(0usize, json!(2)).unwrap();
    assert_eq!(m_arr.get(0usize), Some(json!(2)));
    assert_eq!(m_arr.len(), 3);
    assert_eq!(m_arr.push(json!(6)).unwrap(), 4);
    assert_eq!(m_arr.pop().unwrap(), Some(json!(6)));
    assert_eq!(m_arr.len(), 3);

    let c = m_obj.child("c").unwrap();
    assert_eq!(c.get("x"), Some(json!("x")));
    c.assign("x", json!("z")).unwrap();
    assert_eq!(c.get("x"), Some(json!("z")));
    c.child("w").unwrap().assign("alpha", json!("g")).unwrap();

    assert_eq!(target.target().raw(), m_obj.raw());
}
