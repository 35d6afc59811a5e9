use super::{LinkCore, Propagate, SyncLink, DEFAULT_HANDLED_CAPACITY};
use crate::error::Result;
use crate::tree::{ChangeEvent, MonitoredTree};

/// Replays every source change onto an in-process copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCopy;

impl Propagate for LocalCopy {
    fn source_changed(&self, link: &LinkCore, change: &ChangeEvent) -> Result<()> {
        link.update_target(
            &change.path,
            change.action,
            change.value.clone(),
            Some(change.transaction_id.clone()),
        )
    }
}

/// A detached copy that follows its source but never writes back.
pub type LocalMirror = SyncLink<LocalCopy>;

impl SyncLink<LocalCopy> {
    pub fn attach(source: &MonitoredTree) -> Self {
        Self::attach_with_capacity(source, DEFAULT_HANDLED_CAPACITY)
    }

    pub fn attach_with_capacity(source: &MonitoredTree, capacity: usize) -> Self {
        SyncLink::bind(source, source.deep_copy(), LocalCopy, capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TransactionId;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_mirror_tracks_source() {
        let source = MonitoredTree::wrap(json!({"a": 1, "c": {"z": [1, 2]}}), false).unwrap();
        let mirror = LocalMirror::attach(&source);

        source.set_property("a", json!(2), None).unwrap();
        source.child("c").unwrap().child("z").unwrap().push(json!(3)).unwrap();
        source.child("c").unwrap().delete_property("z", None);

        assert_eq!(mirror.target().raw(), json!({"a": 2, "c": {}}));
        assert!(!mirror.target().same_tree(&source));
    }

    #[test]
    fn test_target_writes_do_not_flow_back() {
        let source = MonitoredTree::wrap(json!({"a": 1}), true).unwrap();
        let mirror = LocalMirror::attach(&source);

        mirror.target().set_property("b", json!(true), None).unwrap();
        assert_eq!(source.raw(), json!({"a": 1}));
        assert!(mirror.target().is_extensible());
    }

    #[test]
    fn test_duplicate_transaction_is_handled_once() {
        let source = MonitoredTree::wrap(json!({"n": 0}), false).unwrap();
        let mirror = LocalMirror::attach(&source);
        let seen = Arc::new(Mutex::new(0));
        let count = seen.clone();
        let _sub = mirror.on_change(move |_| *count.lock() += 1);

        let tx = TransactionId::from("same");
        source.set_property("n", json!(1), Some(tx.clone())).unwrap();
        source.set_property("n", json!(2), Some(tx)).unwrap();

        assert_eq!(*seen.lock(), 1);
        assert_eq!(mirror.target().get("n"), Some(json!(1)));
    }

    #[test]
    fn test_dropping_the_mirror_releases_the_source() {
        let source = MonitoredTree::wrap(json!({"n": 0}), false).unwrap();
        let mirror = LocalMirror::attach(&source);
        assert_eq!(source.change_listeners(), 1);

        let copy = mirror.clone();
        drop(mirror);
        assert_eq!(source.change_listeners(), 1);
        drop(copy);
        assert_eq!(source.change_listeners(), 0);
    }

    #[test]
    fn test_unbind() {
        let source = MonitoredTree::wrap(json!({"n": 0}), false).unwrap();
        let mirror = LocalMirror::attach(&source);
        mirror.unbind();
        assert!(!mirror.is_bound());

        source.set_property("n", json!(5), None).unwrap();
        assert_eq!(mirror.target().get("n"), Some(json!(0)));
    }
}
