use std::sync::Arc;

use tracing::debug;

use super::protocol::{ChangeMessage, SyncMessage};
use super::{LinkCore, Propagate, SyncLink};
use crate::error::Result;
use crate::transport::Transport;
use crate::tree::{ChangeEvent, MonitoredTree};

/// Forwards local changes of one named object to the transport peer.
pub struct RemotePeer {
    id: String,
    pool_id: Option<String>,
    transport: Arc<dyn Transport>,
}

impl RemotePeer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pool_id(&self) -> Option<&str> {
        self.pool_id.as_deref()
    }
}

impl Propagate for RemotePeer {
    fn source_changed(&self, link: &LinkCore, change: &ChangeEvent) -> Result<()> {
        // Came in over the transport; the peer already has it.
        if link.was_applied(&change.transaction_id) {
            return Ok(());
        }

        debug!(
            object = %self.id,
            path = %change.dotted_path(),
            action = %change.action,
            "emit change"
        );
        self.transport.emit(SyncMessage::Change(ChangeMessage {
            id: self.id.clone(),
            path: change.path.clone(),
            action: change.action,
            value: change.value.clone(),
            transaction_id: change.transaction_id.clone(),
            pool_id: self.pool_id.clone(),
        }));
        Ok(())
    }
}

/// Keeps one tree in step with its counterpart on the other end of a
/// transport. Source and target are the same tree: local mutations go out,
/// inbound changes are applied in place and not sent back.
pub type RemoteMirror = SyncLink<RemotePeer>;

impl SyncLink<RemotePeer> {
    pub fn connect(
        id: impl Into<String>,
        tree: MonitoredTree,
        transport: Arc<dyn Transport>,
        pool_id: Option<String>,
        capacity: usize,
    ) -> Self {
        let peer = RemotePeer {
            id: id.into(),
            pool_id,
            transport,
        };
        let source = tree.clone();
        SyncLink::bind(&source, tree, peer, capacity)
    }

    pub fn id(&self) -> &str {
        self.propagator().id()
    }

    pub fn tree(&self) -> &MonitoredTree {
        self.target()
    }

    /// Apply a change received from the peer. Transactions this tree has
    /// already seen, including ones it originated, are dropped.
    pub fn apply_message(&self, message: &ChangeMessage) -> Result<()> {
        if self.inner.core.was_handled(&message.transaction_id) {
            debug!(object = %self.id(), transaction = %message.transaction_id, "drop echoed change");
            return Ok(());
        }
        self.update_target(
            &message.path,
            message.action,
            message.value.clone(),
            Some(message.transaction_id.clone()),
        )
    }
}
