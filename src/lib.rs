//! # dx-mirror - live JSON object synchronization
//!
//! Wrap a JSON object or array in a [`MonitoredTree`] and every mutation
//! surfaces as a path-addressed change event tagged with a transaction id.
//! Sync links replay those events elsewhere:
//!
//! - **LocalMirror**: a detached in-process copy that follows its source
//! - **RemoteMirror**: one object kept in step over a transport
//! - **DocumentMirror**: the object persisted to a document store
//!
//! A [`SyncPool`] multiplexes any number of named objects over one transport
//! (in-memory or WebSocket).
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use dx_mirror::{MemoryTransport, Role, SyncPool};
//! use serde_json::json;
//!
//! let (server_end, client_end) = MemoryTransport::pair();
//! let server = SyncPool::new(Arc::new(server_end), Role::Server, "p1");
//! let client = SyncPool::new(Arc::new(client_end), Role::Client, "p1");
//!
//! let widget = server.create("widget", json!({"count": 1}), true).unwrap();
//! widget.set_property("count", json!(2), None).unwrap();
//!
//! assert_eq!(client.get("widget").unwrap().get("count"), Some(json!(2)));
//! ```

pub mod config;
pub mod error;
pub mod notifier;
pub mod server;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod tree;

// Re-export main types for library consumers
pub use config::MirrorConfig;
pub use error::{Result, SyncError};
pub use notifier::{Notifier, Subscription};
pub use storage::{DocumentStore, InsertResult, SqliteStore, StoreError};
pub use sync::{
    apply_change, from_document_store, CreatedObject, DocumentMirror, LocalMirror, RemoteMirror,
    Role, SyncLink, SyncMessage, SyncPool,
};
pub use transport::{MemoryTransport, Transport, WireFormat, WsTransport};
pub use tree::{Action, ChangeEvent, MonitoredTree, PathKey, TransactionId};

use serde_json::Value;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wrap a raw object or array for monitoring.
pub fn wrap_tree(raw: Value, extensible: bool) -> Result<MonitoredTree> {
    MonitoredTree::wrap(raw, extensible)
}

/// Plain copy of the tree as it is right now. Later changes on either side
/// are not shared.
pub fn snapshot_copy(tree: &MonitoredTree) -> Value {
    tree.raw()
}

/// A copy that keeps following `tree`; read it through `target()`.
pub fn synced_copy(tree: &MonitoredTree) -> LocalMirror {
    LocalMirror::attach(tree)
}
