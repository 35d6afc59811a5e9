//! Array pass-through operations for monitored arrays.
//!
//! Every operation notifies `methodCall` once it has run. Only `push` also
//! produces a `change` event, at the new last index, so appends travel through
//! the same channel as property writes.

use std::sync::{Arc, Weak};

use serde_json::Value;

use super::{ChangeEvent, MethodCall, MonitoredTree, PathKey, Shape, Slot, TransactionId, TreeInner};
use crate::error::{Result, SyncError};

impl MonitoredTree {
    fn mutate_array<R>(
        &self,
        method: &'static str,
        args: Vec<Value>,
        reindex: bool,
        op: impl FnOnce(&mut Vec<Slot>, &Weak<TreeInner>, bool) -> R,
    ) -> Result<R> {
        let weak = Arc::downgrade(&self.inner);
        let result = {
            let mut state = self.inner.state.lock();
            let extensible = state.extensible;
            let Shape::Array(items) = &mut state.shape else {
                return Err(SyncError::NotAnArray { method });
            };
            let result = op(items, &weak, extensible);
            if reindex {
                reindex_forwarders(items, &weak);
            }
            result
        };

        self.inner.method_calls.notify(&MethodCall { method, args });
        Ok(result)
    }

    fn read_array<R>(
        &self,
        method: &'static str,
        args: Vec<Value>,
        op: impl FnOnce(&[Value]) -> R,
    ) -> Result<R> {
        let items: Vec<Value> = match &self.inner.state.lock().shape {
            Shape::Array(items) => items.iter().map(Slot::to_value).collect(),
            Shape::Object(_) => return Err(SyncError::NotAnArray { method }),
        };

        let result = op(&items);
        self.inner.method_calls.notify(&MethodCall { method, args });
        Ok(result)
    }

    /// Index the next `push` will write to.
    pub fn next_index(&self) -> usize {
        self.len()
    }

    /// Append `value`, returning the new length.
    pub fn push(&self, value: Value) -> Result<usize> {
        let len = self.mutate_array("push", vec![value.clone()], false, |items, weak, extensible| {
            let index = items.len();
            items.push(Slot::build(weak, PathKey::Index(index), value.clone(), extensible));
            items.len()
        })?;

        self.inner.changes.notify(&ChangeEvent::set(
            PathKey::Index(len - 1),
            value,
            TransactionId::new(),
        ));
        Ok(len)
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        self.mutate_array("pop", Vec::new(), false, |items, _, _| {
            items.pop().map(|slot| slot.to_value())
        })
    }

    pub fn shift(&self) -> Result<Option<Value>> {
        self.mutate_array("shift", Vec::new(), true, |items, _, _| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0).to_value())
            }
        })
    }

    /// Prepend `values` in order, returning the new length.
    pub fn unshift(&self, values: Vec<Value>) -> Result<usize> {
        self.mutate_array("unshift", values.clone(), true, |items, weak, extensible| {
            let front: Vec<Slot> = values
                .into_iter()
                .enumerate()
                .map(|(index, value)| Slot::build(weak, PathKey::Index(index), value, extensible))
                .collect();
            items.splice(0..0, front);
            items.len()
        })
    }

    /// Remove `delete_count` elements at `start` and insert `insert` in their
    /// place. Out-of-range bounds are clamped. Returns the removed elements.
    pub fn splice(&self, start: usize, delete_count: usize, insert: Vec<Value>) -> Result<Vec<Value>> {
        let mut args = vec![Value::from(start), Value::from(delete_count)];
        args.extend(insert.iter().cloned());

        self.mutate_array("splice", args, true, |items, weak, extensible| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let replacement: Vec<Slot> = insert
                .into_iter()
                .enumerate()
                .map(|(offset, value)| {
                    Slot::build(weak, PathKey::Index(start + offset), value, extensible)
                })
                .collect();
            items
                .splice(start..end, replacement)
                .map(|slot| slot.to_value())
                .collect()
        })
    }

    /// Sort elements by their string form, like a default JavaScript sort.
    pub fn sort(&self) -> Result<()> {
        self.mutate_array("sort", Vec::new(), true, |items, _, _| {
            items.sort_by_cached_key(|slot| js_string(&slot.to_value()));
        })
    }

    pub fn reverse(&self) -> Result<()> {
        self.mutate_array("reverse", Vec::new(), true, |items, _, _| items.reverse())
    }

    pub fn concat(&self, other: &[Value]) -> Result<Vec<Value>> {
        self.read_array("concat", other.to_vec(), |items| {
            items.iter().chain(other.iter()).cloned().collect()
        })
    }

    pub fn slice(&self, start: usize, end: Option<usize>) -> Result<Vec<Value>> {
        let args = vec![Value::from(start), end.map(Value::from).unwrap_or(Value::Null)];
        self.read_array("slice", args, |items| {
            let end = end.unwrap_or(items.len()).min(items.len());
            let start = start.min(end);
            items[start..end].to_vec()
        })
    }

    /// Join elements with `separator`; `null` elements join as empty strings.
    pub fn join(&self, separator: &str) -> Result<String> {
        self.read_array("join", vec![Value::from(separator)], |items| {
            items
                .iter()
                .map(|item| match item {
                    Value::Null => String::new(),
                    other => js_string(other),
                })
                .collect::<Vec<_>>()
                .join(separator)
        })
    }

    pub fn index_of(&self, needle: &Value) -> Result<Option<usize>> {
        self.read_array("indexOf", vec![needle.clone()], |items| {
            items.iter().position(|item| item == needle)
        })
    }

    pub fn filter(&self, mut predicate: impl FnMut(&Value) -> bool) -> Result<Vec<Value>> {
        self.read_array("filter", Vec::new(), |items| {
            items.iter().filter(|item| predicate(*item)).cloned().collect()
        })
    }

    pub fn map<T>(&self, f: impl FnMut(&Value) -> T) -> Result<Vec<T>> {
        self.read_array("map", Vec::new(), |items| items.iter().map(f).collect())
    }

    pub fn reduce<T>(&self, init: T, f: impl FnMut(T, &Value) -> T) -> Result<T> {
        self.read_array("reduce", Vec::new(), |items| items.iter().fold(init, f))
    }
}

/// Point every nested element's forwarder at its current index.
fn reindex_forwarders(items: &mut [Slot], parent: &Weak<TreeInner>) {
    for (index, slot) in items.iter_mut().enumerate() {
        if let Slot::Nested { tree, forward } = slot {
            *forward = tree.forward_to(parent, PathKey::Index(index));
        }
    }
}

fn js_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::record;
    use crate::tree::Action;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_push_pop_length() {
        let arr = MonitoredTree::wrap(json!([1, 2, 3]), false).unwrap();
        assert_eq!(arr.len(), 3);

        assert_eq!(arr.push(json!(6)).unwrap(), 4);
        assert_eq!(arr.len(), 4);
        assert_eq!(arr.next_index(), 4);
        assert_eq!(arr.pop().unwrap(), Some(json!(6)));
        assert_eq!(arr.len(), 3);
    }

    #[test]
    fn test_push_synthesizes_change() {
        let arr = MonitoredTree::wrap(json!([1]), false).unwrap();
        let (events, _sub) = record(&arr);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();
        let _calls = arr.on_method_call(move |call| log.lock().push(call.method));

        arr.push(json!({"k": 1})).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, vec![PathKey::Index(1)]);
        assert_eq!(events[0].action, Action::Set);
        assert_eq!(events[0].value, Some(json!({"k": 1})));
        assert_eq!(*calls.lock(), vec!["push"]);
        assert!(arr.child(1usize).is_some());
    }

    #[test]
    fn test_structural_ops_only_notify_method_calls() {
        let arr = MonitoredTree::wrap(json!([3, 1, 2]), false).unwrap();
        let (events, _sub) = record(&arr);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = calls.clone();
        let _calls = arr.on_method_call(move |call| log.lock().push(call.method));

        arr.sort().unwrap();
        assert_eq!(arr.raw(), json!([1, 2, 3]));
        arr.reverse().unwrap();
        assert_eq!(arr.raw(), json!([3, 2, 1]));
        assert_eq!(arr.shift().unwrap(), Some(json!(3)));
        assert_eq!(arr.unshift(vec![json!(7), json!(8)]).unwrap(), 4);
        assert_eq!(arr.raw(), json!([7, 8, 2, 1]));
        assert_eq!(arr.splice(1, 2, vec![json!("x")]).unwrap(), vec![json!(8), json!(2)]);
        assert_eq!(arr.raw(), json!([7, "x", 1]));

        assert!(events.lock().is_empty());
        assert_eq!(
            *calls.lock(),
            vec!["sort", "reverse", "shift", "unshift", "splice"]
        );
    }

    #[test]
    fn test_reindexed_children_forward_new_index() {
        let arr = MonitoredTree::wrap(json!([{"n": 0}, {"n": 1}]), false).unwrap();
        arr.shift().unwrap();
        let (events, _sub) = record(&arr);

        arr.child(0usize).unwrap().set_property("n", json!(10), None).unwrap();

        let events = events.lock();
        assert_eq!(events[0].path, vec![PathKey::Index(0), PathKey::from("n")]);
        assert_eq!(arr.raw(), json!([{"n": 10}]));
    }

    #[test]
    fn test_read_only_queries() {
        let arr = MonitoredTree::wrap(json!([1, 2, 3, null]), false).unwrap();
        assert_eq!(arr.index_of(&json!(3)).unwrap(), Some(2));
        assert_eq!(arr.index_of(&json!(9)).unwrap(), None);
        assert_eq!(arr.join("-").unwrap(), "1-2-3-");
        assert_eq!(arr.slice(1, Some(3)).unwrap(), vec![json!(2), json!(3)]);
        assert_eq!(arr.concat(&[json!(4)]).unwrap().len(), 5);
        assert_eq!(
            arr.filter(|v| v.as_i64().is_some_and(|n| n > 1)).unwrap(),
            vec![json!(2), json!(3)]
        );
        assert_eq!(arr.map(|v| v.is_null()).unwrap(), vec![false, false, false, true]);
        assert_eq!(arr.reduce(0, |acc, v| acc + v.as_i64().unwrap_or(0)).unwrap(), 6);
        assert_eq!(arr.raw(), json!([1, 2, 3, null]));
    }

    #[test]
    fn test_array_ops_on_objects_fail() {
        let obj = MonitoredTree::wrap(json!({"a": 1}), true).unwrap();
        assert!(matches!(obj.push(json!(1)), Err(SyncError::NotAnArray { method: "push" })));
        assert!(matches!(obj.join(","), Err(SyncError::NotAnArray { method: "join" })));
    }
}
