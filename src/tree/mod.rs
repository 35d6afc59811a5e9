//! Monitored trees: JSON objects and arrays whose every mutation surfaces as a
//! path-addressed [`ChangeEvent`] at the root.
//!
//! A tree is a handle over shared state. Scalars live directly in their slot,
//! object and array values live in a nested tree owned by exactly one parent
//! slot. Each nested tree forwards its `change` events to the parent with its
//! key prepended, so a mutation three levels down reaches root listeners with
//! the full key chain.
//!
//! ```rust
//! use dx_mirror::tree::MonitoredTree;
//! use serde_json::json;
//!
//! let tree = MonitoredTree::wrap(json!({"c": {"x": "x"}}), false).unwrap();
//! let _sub = tree.on_change(|event| println!("{} -> {:?}", event.dotted_path(), event.value));
//! tree.child("c").unwrap().set_property("x", json!("z"), None).unwrap();
//! assert_eq!(tree.raw(), json!({"c": {"x": "z"}}));
//! ```

mod array;
mod event;

pub use event::{Action, ChangeEvent, MethodCall, PathKey, SetEvent, TransactionId};

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{kind_name, Result, SyncError};
use crate::notifier::{Notifier, Subscription};

/// Most `null` slots a single array write may pad in before its index.
pub const MAX_INDEX_GAP: usize = 1024;

pub(crate) enum Slot {
    Scalar(Value),
    Nested {
        tree: MonitoredTree,
        forward: Subscription,
    },
}

impl Slot {
    fn build(parent: &Weak<TreeInner>, key: PathKey, value: Value, extensible: bool) -> Self {
        match value {
            Value::Object(_) | Value::Array(_) => {
                let tree = MonitoredTree::build(value, extensible);
                let forward = tree.forward_to(parent, key);
                Slot::Nested { tree, forward }
            }
            scalar => Slot::Scalar(scalar),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Slot::Scalar(value) => value.clone(),
            Slot::Nested { tree, .. } => tree.raw(),
        }
    }

    fn tree(&self) -> Option<&MonitoredTree> {
        match self {
            Slot::Scalar(_) => None,
            Slot::Nested { tree, .. } => Some(tree),
        }
    }
}

pub(crate) enum Shape {
    Object(IndexMap<String, Slot>),
    Array(Vec<Slot>),
}

impl Shape {
    fn get(&self, key: &PathKey) -> Option<&Slot> {
        match self {
            Shape::Object(fields) => fields.get(&key.as_field()),
            Shape::Array(items) => key.as_index().and_then(|index| items.get(index)),
        }
    }

    fn len(&self) -> usize {
        match self {
            Shape::Object(fields) => fields.len(),
            Shape::Array(items) => items.len(),
        }
    }
}

pub(crate) struct TreeState {
    shape: Shape,
    extensible: bool,
}

pub(crate) struct TreeInner {
    state: Mutex<TreeState>,
    changes: Notifier<ChangeEvent>,
    sets: Notifier<SetEvent>,
    method_calls: Notifier<MethodCall>,
}

/// Handle to a monitored object or array. Clones share the same tree.
#[derive(Clone)]
pub struct MonitoredTree {
    inner: Arc<TreeInner>,
}

impl MonitoredTree {
    /// Wrap a raw object or array. Arrays are always extensible.
    pub fn wrap(raw: Value, extensible: bool) -> Result<Self> {
        match raw {
            Value::Object(_) | Value::Array(_) => Ok(Self::build(raw, extensible)),
            other => Err(SyncError::TypeKind {
                found: kind_name(&other),
            }),
        }
    }

    fn build(raw: Value, extensible: bool) -> Self {
        let extensible = extensible || raw.is_array();
        let inner = Arc::new(TreeInner {
            state: Mutex::new(TreeState {
                shape: Shape::Object(IndexMap::new()),
                extensible,
            }),
            changes: Notifier::new(),
            sets: Notifier::new(),
            method_calls: Notifier::new(),
        });
        let weak = Arc::downgrade(&inner);

        let shape = match raw {
            Value::Array(items) => Shape::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| {
                        Slot::build(&weak, PathKey::Index(index), value, extensible)
                    })
                    .collect(),
            ),
            Value::Object(fields) => Shape::Object(
                fields
                    .into_iter()
                    .map(|(name, value)| {
                        let slot = Slot::build(&weak, PathKey::Field(name.clone()), value, extensible);
                        (name, slot)
                    })
                    .collect(),
            ),
            _ => Shape::Object(IndexMap::new()),
        };
        inner.state.lock().shape = shape;

        Self { inner }
    }

    /// Re-emit this tree's change events on `parent` under `key`.
    fn forward_to(&self, parent: &Weak<TreeInner>, key: PathKey) -> Subscription {
        let parent = parent.clone();
        self.inner.changes.subscribe(move |event: &ChangeEvent| {
            if let Some(parent) = parent.upgrade() {
                parent.changes.notify(&event.prefixed(key.clone()));
            }
        })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.inner.state.lock().shape, Shape::Array(_))
    }

    pub fn is_extensible(&self) -> bool {
        self.inner.state.lock().extensible
    }

    /// Number of keys of an object, or elements of an array.
    pub fn len(&self) -> usize {
        self.inner.state.lock().shape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<PathKey> {
        match &self.inner.state.lock().shape {
            Shape::Object(fields) => fields.keys().cloned().map(PathKey::Field).collect(),
            Shape::Array(items) => (0..items.len()).map(PathKey::Index).collect(),
        }
    }

    pub fn contains_key(&self, key: impl Into<PathKey>) -> bool {
        self.inner.state.lock().shape.get(&key.into()).is_some()
    }

    /// Current value under `key`, nested containers included.
    pub fn get(&self, key: impl Into<PathKey>) -> Option<Value> {
        self.inner.state.lock().shape.get(&key.into()).map(Slot::to_value)
    }

    /// The nested tree owning the object or array under `key`.
    pub fn child(&self, key: impl Into<PathKey>) -> Option<MonitoredTree> {
        self.inner
            .state
            .lock()
            .shape
            .get(&key.into())
            .and_then(Slot::tree)
            .cloned()
    }

    /// Reassemble the full raw value.
    pub fn raw(&self) -> Value {
        match &self.inner.state.lock().shape {
            Shape::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, slot)| (name.clone(), slot.to_value()))
                    .collect::<Map<String, Value>>(),
            ),
            Shape::Array(items) => Value::Array(items.iter().map(Slot::to_value).collect()),
        }
    }

    /// Independent tree over a deep copy of the current value, with the same
    /// extensibility. Nothing links the two afterwards.
    pub fn deep_copy(&self) -> MonitoredTree {
        Self::build(self.raw(), self.is_extensible())
    }

    /// Write `value` under `key` and emit `set` followed by `change`.
    ///
    /// Adding a key fails with [`SyncError::ExtensionDenied`] unless the tree is
    /// extensible. On arrays an index past the end pads with `null`, up to
    /// [`MAX_INDEX_GAP`] missing slots; a larger gap is [`SyncError::InvalidKey`].
    pub fn set_property(
        &self,
        key: impl Into<PathKey>,
        value: Value,
        transaction_id: Option<TransactionId>,
    ) -> Result<()> {
        let key = key.into();
        let transaction_id = transaction_id.unwrap_or_default();
        let weak = Arc::downgrade(&self.inner);

        let (key, replaced) = {
            let mut state = self.inner.state.lock();
            let extensible = state.extensible;
            match &mut state.shape {
                Shape::Object(fields) => {
                    let name = key.as_field();
                    if !extensible && !fields.contains_key(&name) {
                        return Err(SyncError::ExtensionDenied { key });
                    }
                    let slot =
                        Slot::build(&weak, PathKey::Field(name.clone()), value.clone(), extensible);
                    let replaced = fields.insert(name.clone(), slot);
                    (PathKey::Field(name), replaced)
                }
                Shape::Array(items) => {
                    let index = key.as_index().ok_or(SyncError::InvalidKey { key })?;
                    if index.saturating_sub(items.len()) > MAX_INDEX_GAP {
                        return Err(SyncError::InvalidKey {
                            key: PathKey::Index(index),
                        });
                    }
                    let slot = Slot::build(&weak, PathKey::Index(index), value.clone(), extensible);
                    let replaced = if index < items.len() {
                        Some(std::mem::replace(&mut items[index], slot))
                    } else {
                        while items.len() < index {
                            items.push(Slot::Scalar(Value::Null));
                        }
                        items.push(slot);
                        None
                    };
                    (PathKey::Index(index), replaced)
                }
            }
        };
        drop(replaced);

        self.inner.sets.notify(&SetEvent {
            key: key.clone(),
            value: value.clone(),
            transaction_id: transaction_id.clone(),
        });
        self.inner
            .changes
            .notify(&ChangeEvent::set(key, value, transaction_id));
        Ok(())
    }

    /// Remove `key` and emit a `delete` change. Deleting an absent key is a
    /// silent no-op. Array elements become `null` holes; the length is kept.
    ///
    /// Returns whether the key existed.
    pub fn delete_property(
        &self,
        key: impl Into<PathKey>,
        transaction_id: Option<TransactionId>,
    ) -> bool {
        let key = key.into();

        let (key, removed) = {
            let mut state = self.inner.state.lock();
            match &mut state.shape {
                Shape::Object(fields) => {
                    let name = key.as_field();
                    match fields.shift_remove(&name) {
                        Some(slot) => (PathKey::Field(name), slot),
                        None => return false,
                    }
                }
                Shape::Array(items) => {
                    let Some(index) = key.as_index().filter(|index| *index < items.len()) else {
                        return false;
                    };
                    let slot = std::mem::replace(&mut items[index], Slot::Scalar(Value::Null));
                    (PathKey::Index(index), slot)
                }
            }
        };
        drop(removed);

        self.inner.changes.notify(&ChangeEvent::delete(
            key,
            transaction_id.unwrap_or_default(),
        ));
        true
    }

    /// Plain field assignment, only allowed on extensible trees.
    pub fn assign(&self, key: impl Into<PathKey>, value: Value) -> Result<()> {
        let key = key.into();
        if !self.is_extensible() {
            return Err(SyncError::MutationDenied { key });
        }
        self.set_property(key, value, None)
    }

    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(handler)
    }

    pub fn on_set<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SetEvent) + Send + Sync + 'static,
    {
        self.inner.sets.subscribe(handler)
    }

    pub fn on_method_call<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&MethodCall) + Send + Sync + 'static,
    {
        self.inner.method_calls.subscribe(handler)
    }

    /// Number of handlers currently listening for `change` on this node,
    /// including the forwarder installed by a parent.
    pub fn change_listeners(&self) -> usize {
        self.inner.changes.len()
    }

    /// Whether both handles point at the same tree.
    pub fn same_tree(&self, other: &MonitoredTree) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for MonitoredTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoredTree")
            .field("raw", &self.raw())
            .field("extensible", &self.is_extensible())
            .finish()
    }
}
