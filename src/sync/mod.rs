//! Sync links: replay the changes of a source tree onto a target.
//!
//! A [`SyncLink`] listens to its source's `change` events. The first time a
//! transaction id shows up it hands the event to its [`Propagate`] strategy
//! and re-emits it to the link's own listeners; repeats are dropped. Inbound
//! changes go through [`SyncLink::update_target`], which walks the target by
//! path and applies each transaction at most once.
//!
//! Echo suppression is only as good as the uniqueness of transaction ids.

pub mod document;
pub mod local;
pub mod pool;
pub mod protocol;
pub mod remote;

pub use document::{from_document_store, DocumentMirror, DocumentPersist};
pub use local::{LocalCopy, LocalMirror};
pub use pool::{CreatedObject, PoolObject, Role, SyncPool, DEFAULT_POOL_ID};
pub use protocol::{ChangeMessage, CreateObject, MessageKind, PoolInit, SyncMessage};
pub use remote::{RemoteMirror, RemotePeer};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::notifier::{Notifier, Subscription};
use crate::tree::{Action, ChangeEvent, MonitoredTree, PathKey, TransactionId};

/// Transaction ids remembered per link before the oldest are forgotten.
pub const DEFAULT_HANDLED_CAPACITY: usize = 10_000;

/// Insertion-ordered set of transaction ids with a size cap.
struct SeenSet {
    members: HashSet<TransactionId>,
    order: VecDeque<TransactionId>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            members: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false when `id` was already present.
    fn insert(&mut self, id: TransactionId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    fn remove(&mut self, id: &TransactionId) {
        if self.members.remove(id) {
            self.order.retain(|seen| seen != id);
        }
    }

    fn contains(&self, id: &TransactionId) -> bool {
        self.members.contains(id)
    }
}

/// Propagation strategy of a link: what happens to a new source change.
pub trait Propagate: Send + Sync + 'static {
    fn source_changed(&self, link: &LinkCore, change: &ChangeEvent) -> Result<()>;
}

/// State shared by every link specialization.
pub struct LinkCore {
    target: MonitoredTree,
    handled: Mutex<SeenSet>,
    applied: Mutex<SeenSet>,
    changes: Notifier<ChangeEvent>,
}

impl LinkCore {
    fn new(target: MonitoredTree, capacity: usize) -> Self {
        Self {
            target,
            handled: Mutex::new(SeenSet::new(capacity)),
            applied: Mutex::new(SeenSet::new(capacity)),
            changes: Notifier::new(),
        }
    }

    pub fn target(&self) -> &MonitoredTree {
        &self.target
    }

    /// Whether `id` reached the target through [`LinkCore::update_target`].
    pub fn was_applied(&self, id: &TransactionId) -> bool {
        self.applied.lock().contains(id)
    }

    /// Whether `id` already went through this link's source listener.
    pub fn was_handled(&self, id: &TransactionId) -> bool {
        self.handled.lock().contains(id)
    }

    /// Apply one change to the target. A transaction already applied is a
    /// no-op; a failed application is forgotten so a redelivery can retry.
    pub fn update_target(
        &self,
        path: &[PathKey],
        action: Action,
        value: Option<Value>,
        transaction_id: Option<TransactionId>,
    ) -> Result<()> {
        let transaction_id = transaction_id.unwrap_or_default();
        if !self.applied.lock().insert(transaction_id.clone()) {
            debug!(transaction = %transaction_id, "transaction already applied");
            return Ok(());
        }

        let outcome = apply_change(&self.target, path, action, value, transaction_id.clone());
        if outcome.is_err() {
            self.applied.lock().remove(&transaction_id);
        }
        outcome
    }
}

struct LinkInner<P> {
    core: LinkCore,
    propagator: P,
    source: Mutex<Option<Subscription>>,
}

impl<P: Propagate> LinkInner<P> {
    fn source_changed(&self, change: &ChangeEvent) {
        if !self.core.handled.lock().insert(change.transaction_id.clone()) {
            return;
        }

        if let Err(err) = self.propagator.source_changed(&self.core, change) {
            warn!(
                path = %change.dotted_path(),
                transaction = %change.transaction_id,
                error = %err,
                "failed to propagate change"
            );
        }
        self.core.changes.notify(change);
    }
}

/// Binds one source tree to one target tree. Clones share the link; the
/// listener on the source is released when the last clone is dropped.
pub struct SyncLink<P> {
    inner: Arc<LinkInner<P>>,
}

impl<P> Clone for SyncLink<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Propagate> SyncLink<P> {
    pub fn bind(source: &MonitoredTree, target: MonitoredTree, propagator: P, capacity: usize) -> Self {
        let inner = Arc::new(LinkInner {
            core: LinkCore::new(target, capacity),
            propagator,
            source: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = source.on_change(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.source_changed(change);
            }
        });
        *inner.source.lock() = Some(subscription);

        Self { inner }
    }

    pub fn target(&self) -> &MonitoredTree {
        &self.inner.core.target
    }

    pub fn propagator(&self) -> &P {
        &self.inner.propagator
    }

    pub fn update_target(
        &self,
        path: &[PathKey],
        action: Action,
        value: Option<Value>,
        transaction_id: Option<TransactionId>,
    ) -> Result<()> {
        self.inner.core.update_target(path, action, value, transaction_id)
    }

    /// Listen to the source changes this link has accepted.
    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.core.changes.subscribe(handler)
    }

    /// Stop listening to the source without waiting for the link to drop.
    pub fn unbind(&self) {
        drop(self.inner.source.lock().take());
    }

    pub fn is_bound(&self) -> bool {
        self.inner.source.lock().is_some()
    }
}

/// Walk `target` along all but the last key of `path`, then set or delete
/// the last key.
pub fn apply_change(
    target: &MonitoredTree,
    path: &[PathKey],
    action: Action,
    value: Option<Value>,
    transaction_id: TransactionId,
) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        return Err(SyncError::PathNotFound {
            path: Vec::new(),
            segment: String::new(),
        });
    };

    let mut node = target.clone();
    for segment in parents {
        node = node
            .child(segment.clone())
            .ok_or_else(|| SyncError::PathNotFound {
                path: path.to_vec(),
                segment: segment.to_string(),
            })?;
    }

    match action {
        Action::Set => node.set_property(last.clone(), value.unwrap_or(Value::Null), Some(transaction_id)),
        Action::Delete => {
            node.delete_property(last.clone(), Some(transaction_id));
            Ok(())
        }
    }
}

/// [`apply_change`] for a recorded event.
pub fn apply_event(target: &MonitoredTree, event: &ChangeEvent) -> Result<()> {
    apply_change(
        target,
        &event.path,
        event.action,
        event.value.clone(),
        event.transaction_id.clone(),
    )
}
