use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::protocol::{ChangeMessage, CreateObject, MessageKind, PoolInit, SyncMessage};
use super::remote::RemoteMirror;
use super::DEFAULT_HANDLED_CAPACITY;
use crate::config::MirrorConfig;
use crate::error::Result;
use crate::notifier::{Notifier, Subscription};
use crate::transport::Transport;
use crate::tree::MonitoredTree;

pub const DEFAULT_POOL_ID: &str = "syncedpool";

/// Which end of the transport a pool sits on. Only a client announces itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "server" => Ok(Role::Server),
            other => Err(anyhow::anyhow!("unknown pool role: {other}")),
        }
    }
}

/// Payload of the pool-level `create` event.
#[derive(Debug, Clone)]
pub struct CreatedObject {
    pub name: String,
    pub obj: MonitoredTree,
}

/// What [`SyncPool::create`] accepts: a raw value to wrap or a tree to use as-is.
pub enum PoolObject {
    Raw(Value),
    Tree(MonitoredTree),
}

impl From<Value> for PoolObject {
    fn from(value: Value) -> Self {
        PoolObject::Raw(value)
    }
}

impl From<MonitoredTree> for PoolObject {
    fn from(tree: MonitoredTree) -> Self {
        PoolObject::Tree(tree)
    }
}

struct PoolInner {
    id: String,
    role: Role,
    capacity: usize,
    transport: Arc<dyn Transport>,
    objects: DashMap<String, RemoteMirror>,
    creates: Notifier<CreatedObject>,
    pool_inits: Notifier<String>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl PoolInner {
    fn register(&self, name: &str, tree: MonitoredTree) -> RemoteMirror {
        let link = RemoteMirror::connect(
            name,
            tree,
            self.transport.clone(),
            Some(self.id.clone()),
            self.capacity,
        );
        self.objects.insert(name.to_string(), link.clone());
        link
    }

    fn remote_created(&self, create: &CreateObject) {
        if create.pool_id != self.id {
            debug!(pool = %self.id, other = %create.pool_id, "ignoring create for another pool");
            return;
        }

        let tree = match MonitoredTree::wrap(create.obj.clone(), create.extensible) {
            Ok(tree) => tree,
            Err(err) => {
                warn!(pool = %self.id, object = %create.obj_id, error = %err, "rejecting remote object");
                return;
            }
        };
        self.register(&create.obj_id, tree.clone());
        debug!(pool = %self.id, object = %create.obj_id, "remote object created");
        self.creates.notify(&CreatedObject {
            name: create.obj_id.clone(),
            obj: tree,
        });
    }

    fn remote_changed(&self, change: &ChangeMessage) {
        if let Some(pool_id) = &change.pool_id {
            if pool_id != &self.id {
                debug!(pool = %self.id, other = %pool_id, "ignoring change for another pool");
                return;
            }
        }

        // Clone out so no map shard stays locked while handlers run.
        let Some(link) = self.objects.get(&change.id).map(|entry| entry.value().clone()) else {
            debug!(pool = %self.id, object = %change.id, "change for unknown object dropped");
            return;
        };
        if let Err(err) = link.apply_message(change) {
            warn!(
                pool = %self.id,
                object = %change.id,
                path = ?change.path,
                protocol = err.is_protocol(),
                error = %err,
                "failed to apply remote change"
            );
        }
    }
}

/// Multiplexes named synchronized objects over one transport.
///
/// Clones share the pool. Transport handlers hold only a weak reference, so
/// the pool's registrations are released once the last clone is dropped.
#[derive(Clone)]
pub struct SyncPool {
    inner: Arc<PoolInner>,
}

impl SyncPool {
    pub fn new(transport: Arc<dyn Transport>, role: Role, pool_id: impl Into<String>) -> Self {
        Self::with_capacity(transport, role, pool_id, DEFAULT_HANDLED_CAPACITY)
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &MirrorConfig) -> Self {
        Self::with_capacity(
            transport,
            config.role,
            config.pool_id.clone(),
            config.handled_capacity,
        )
    }

    pub fn with_capacity(
        transport: Arc<dyn Transport>,
        role: Role,
        pool_id: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            id: pool_id.into(),
            role,
            capacity,
            transport: transport.clone(),
            objects: DashMap::new(),
            creates: Notifier::new(),
            pool_inits: Notifier::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let mut subscriptions = Vec::with_capacity(3);

        let weak = Arc::downgrade(&inner);
        subscriptions.push(transport.on(
            MessageKind::Create,
            Arc::new(move |message: &SyncMessage| {
                if let (Some(pool), SyncMessage::Create(create)) = (weak.upgrade(), message) {
                    pool.remote_created(create);
                }
            }),
        ));

        let weak = Arc::downgrade(&inner);
        subscriptions.push(transport.on(
            MessageKind::Change,
            Arc::new(move |message: &SyncMessage| {
                if let (Some(pool), SyncMessage::Change(change)) = (weak.upgrade(), message) {
                    pool.remote_changed(change);
                }
            }),
        ));

        if role == Role::Server {
            let weak: Weak<PoolInner> = Arc::downgrade(&inner);
            subscriptions.push(transport.on(
                MessageKind::PoolInit,
                Arc::new(move |message: &SyncMessage| {
                    if let (Some(pool), SyncMessage::PoolInit(init)) = (weak.upgrade(), message) {
                        debug!(pool = %pool.id, announced = %init.id, "pool init received");
                        pool.pool_inits.notify(&init.id);
                    }
                }),
            ));
        }
        *inner.subscriptions.lock() = subscriptions;

        if role == Role::Client {
            info!(pool = %inner.id, "announcing pool");
            transport.emit(SyncMessage::PoolInit(PoolInit {
                id: inner.id.clone(),
            }));
        }

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Register `obj` under `name`, announce it to the peer and return the
    /// tree to mutate locally. A previous object under the same name is
    /// replaced and stops syncing.
    pub fn create(&self, name: &str, obj: impl Into<PoolObject>, extensible: bool) -> Result<MonitoredTree> {
        let tree = match obj.into() {
            PoolObject::Tree(tree) => tree,
            PoolObject::Raw(raw) => MonitoredTree::wrap(raw, extensible)?,
        };

        self.inner.register(name, tree.clone());
        self.inner.transport.emit(SyncMessage::Create(CreateObject {
            pool_id: self.inner.id.clone(),
            obj_id: name.to_string(),
            obj: tree.raw(),
            extensible: tree.is_extensible(),
        }));
        self.inner.creates.notify(&CreatedObject {
            name: name.to_string(),
            obj: tree.clone(),
        });
        Ok(tree)
    }

    pub fn get(&self, name: &str) -> Option<MonitoredTree> {
        self.inner
            .objects
            .get(name)
            .map(|entry| entry.value().tree().clone())
    }

    pub fn link(&self, name: &str) -> Option<RemoteMirror> {
        self.inner.objects.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.objects.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.objects.is_empty()
    }

    /// Stop syncing `name`. The tree itself stays usable.
    pub fn remove(&self, name: &str) -> Option<MonitoredTree> {
        self.inner
            .objects
            .remove(name)
            .map(|(_, link)| link.tree().clone())
    }

    /// Fires for objects created locally and for objects learned from the peer.
    pub fn on_create<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CreatedObject) + Send + Sync + 'static,
    {
        self.inner.creates.subscribe(handler)
    }

    /// Server pools only: fires with the id a client pool announces.
    pub fn on_pool_init<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.pool_inits.subscribe(handler)
    }
}

impl fmt::Debug for SyncPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPool")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("objects", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::json;

    fn pools(id: &str) -> (SyncPool, SyncPool) {
        let (server_end, client_end) = MemoryTransport::pair();
        let server = SyncPool::new(Arc::new(server_end), Role::Server, id);
        let client = SyncPool::new(Arc::new(client_end), Role::Client, id);
        (server, client)
    }

    #[test]
    fn test_client_announces_itself() {
        let (server_end, client_end) = MemoryTransport::pair();
        let server = SyncPool::new(Arc::new(server_end), Role::Server, "p1");
        let announced = Arc::new(Mutex::new(Vec::new()));
        let log = announced.clone();
        let _sub = server.on_pool_init(move |id| log.lock().push(id.clone()));

        let _client = SyncPool::new(Arc::new(client_end), Role::Client, "p1");
        assert_eq!(*announced.lock(), vec!["p1".to_string()]);
    }

    #[test]
    fn test_created_object_propagates_both_ways() {
        let (server, client) = pools("p1");
        let learned = Arc::new(Mutex::new(Vec::new()));
        let log = learned.clone();
        let _sub = client.on_create(move |created| log.lock().push(created.name.clone()));

        let widget = server.create("widget", json!({"count": 1}), true).unwrap();
        assert_eq!(*learned.lock(), vec!["widget".to_string()]);

        let mirrored = client.get("widget").unwrap();
        assert_eq!(mirrored.get("count"), Some(json!(1)));
        assert!(mirrored.is_extensible());

        widget.set_property("count", json!(2), None).unwrap();
        assert_eq!(mirrored.get("count"), Some(json!(2)));

        mirrored.set_property("extra", json!("hi"), None).unwrap();
        assert_eq!(widget.get("extra"), Some(json!("hi")));
    }

    #[test]
    fn test_local_create_fires_event() {
        let (server, _client) = pools("p1");
        let names = Arc::new(Mutex::new(Vec::new()));
        let log = names.clone();
        let _sub = server.on_create(move |created| log.lock().push(created.name.clone()));

        let tree = MonitoredTree::wrap(json!([1, 2]), false).unwrap();
        let returned = server.create("list", tree.clone(), false).unwrap();
        assert!(returned.same_tree(&tree));
        assert_eq!(*names.lock(), vec!["list".to_string()]);
        assert_eq!(server.names(), vec!["list".to_string()]);
    }

    #[test]
    fn test_other_pool_ids_are_ignored() {
        let (server_end, client_end) = MemoryTransport::pair();
        let server = SyncPool::new(Arc::new(server_end), Role::Server, "p1");
        let client = SyncPool::new(Arc::new(client_end), Role::Client, "p2");

        server.create("widget", json!({"count": 1}), false).unwrap();
        assert!(client.get("widget").is_none());
        assert!(client.is_empty());
    }

    #[test]
    fn test_unknown_objects_are_dropped() {
        let (server, client) = pools("p1");
        let tree = server.create("shared", json!({"n": 0}), false).unwrap();
        let detached = client.remove("shared").unwrap();

        tree.set_property("n", json!(1), None).unwrap();
        assert_eq!(detached.get("n"), Some(json!(0)));
        assert!(client.get("shared").is_none());
    }

    #[test]
    fn test_echo_does_not_loop() {
        let (server, client) = pools("p1");
        let widget = server.create("widget", json!({"count": 1, "tags": []}), false).unwrap();
        let mirrored = client.get("widget").unwrap();

        let server_changes = Arc::new(Mutex::new(0));
        let count = server_changes.clone();
        let _sub = widget.on_change(move |_| *count.lock() += 1);

        mirrored.child("tags").unwrap().push(json!("x")).unwrap();
        assert_eq!(widget.raw(), json!({"count": 1, "tags": ["x"]}));
        assert_eq!(*server_changes.lock(), 1);
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Server".parse::<Role>().unwrap(), Role::Server);
        assert!("peer".parse::<Role>().is_err());
        assert_eq!(Role::Client.to_string(), "client");
    }
}
