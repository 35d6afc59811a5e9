use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error};

use super::{LinkCore, Propagate, SyncLink, DEFAULT_HANDLED_CAPACITY};
use crate::error::Result;
use crate::storage::{DocumentStore, InsertResult, StoreError, REV_FIELD};
use crate::tree::{ChangeEvent, MonitoredTree, PathKey};

/// Writes the whole tree to a document store after every change.
pub struct DocumentPersist {
    key: String,
    store: Arc<dyn DocumentStore>,
}

impl DocumentPersist {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Propagate for DocumentPersist {
    fn source_changed(&self, link: &LinkCore, change: &ChangeEvent) -> Result<()> {
        if change.path.first() == Some(&PathKey::from(REV_FIELD)) {
            return Ok(());
        }

        let tree = link.target().clone();
        let key = self.key.clone();
        self.store.insert(
            tree.raw(),
            &self.key,
            Box::new(move |outcome: std::result::Result<InsertResult, StoreError>| match outcome {
                Ok(result) if result.ok => {
                    debug!(key = %key, rev = %result.rev, "document saved");
                    if let Err(err) = tree.set_property(REV_FIELD, Value::from(result.rev), None) {
                        error!(key = %key, error = %err, "failed to record document revision");
                    }
                }
                Ok(result) => error!(key = %key, id = %result.id, "document store refused write"),
                Err(err) => error!(key = %key, error = %err, "failed to save document"),
            }),
        );
        Ok(())
    }
}

/// Persists a tree under a fixed document key and tracks the store's
/// revision marker in the tree's `_rev` field.
pub type DocumentMirror = SyncLink<DocumentPersist>;

impl SyncLink<DocumentPersist> {
    /// The tree should be extensible unless it already carries `_rev`,
    /// otherwise the first revision cannot be recorded.
    pub fn persist(tree: MonitoredTree, key: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        let persist = DocumentPersist {
            key: key.into(),
            store,
        };
        let source = tree.clone();
        SyncLink::bind(&source, tree, persist, DEFAULT_HANDLED_CAPACITY)
    }

    pub fn tree(&self) -> &MonitoredTree {
        self.target()
    }

    pub fn key(&self) -> &str {
        self.propagator().key()
    }
}

/// Load `key` from `store`, wrap it as an extensible tree and attach a
/// [`DocumentMirror`]. A missing document starts out as `{}`.
pub fn from_document_store<F>(key: &str, store: Arc<dyn DocumentStore>, on_loaded: F)
where
    F: FnOnce(Result<DocumentMirror>) + Send + 'static,
{
    let owned_key = key.to_string();
    let handle = store.clone();
    store.get(
        key,
        Box::new(move |loaded: std::result::Result<Value, StoreError>| {
            let doc = match loaded {
                Ok(doc) => doc,
                Err(StoreError::NotFound { .. }) => {
                    debug!(key = %owned_key, "document missing, starting empty");
                    json!({})
                }
                Err(err) => return on_loaded(Err(err.into())),
            };
            let mirror = MonitoredTree::wrap(doc, true)
                .map(|tree| DocumentMirror::persist(tree, owned_key, handle));
            on_loaded(mirror);
        }),
    );
}
