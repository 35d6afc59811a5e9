use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Dispatcher, MessageHandler, Transport};
use crate::notifier::Subscription;
use crate::sync::protocol::{MessageKind, SyncMessage};

struct Endpoint {
    name: String,
    dispatcher: Dispatcher,
    peer: Mutex<Weak<Endpoint>>,
}

/// One end of an in-process pipe.
///
/// Every emitted message is serialized to JSON and decoded again before it is
/// handed to the peer, so the receiver never shares data with the sender and
/// the wire shape is exercised exactly as over a socket. Delivery is
/// synchronous: `emit` returns after the peer's handlers have run.
#[derive(Clone)]
pub struct MemoryTransport {
    end: Arc<Endpoint>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, Self) {
        Self::named_pair("server", "client")
    }

    pub fn named_pair(a: &str, b: &str) -> (Self, Self) {
        let first = Arc::new(Endpoint {
            name: a.to_string(),
            dispatcher: Dispatcher::default(),
            peer: Mutex::new(Weak::new()),
        });
        let second = Arc::new(Endpoint {
            name: b.to_string(),
            dispatcher: Dispatcher::default(),
            peer: Mutex::new(Arc::downgrade(&first)),
        });
        *first.peer.lock() = Arc::downgrade(&second);

        (Self { end: first }, Self { end: second })
    }

    pub fn name(&self) -> &str {
        &self.end.name
    }
}

impl Transport for MemoryTransport {
    fn emit(&self, message: SyncMessage) {
        let Some(peer) = self.end.peer.lock().upgrade() else {
            debug!(end = %self.end.name, event = message.kind().event_name(), "peer gone, dropping message");
            return;
        };

        let decoded = serde_json::to_string(&message)
            .and_then(|text| serde_json::from_str::<SyncMessage>(&text));
        match decoded {
            Ok(copy) => {
                debug!(from = %self.end.name, to = %peer.name, event = copy.kind().event_name(), "deliver");
                peer.dispatcher.dispatch(&copy);
            }
            Err(err) => warn!(end = %self.end.name, error = %err, "failed to encode message"),
        }
    }

    fn on(&self, kind: MessageKind, handler: MessageHandler) -> Subscription {
        self.end.dispatcher.on(kind, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::protocol::PoolInit;

    #[test]
    fn test_messages_reach_the_other_end_only() {
        let (server, client) = MemoryTransport::pair();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let _on_server = server.on(
            MessageKind::PoolInit,
            Arc::new(move |message: &SyncMessage| {
                if let SyncMessage::PoolInit(init) = message {
                    log.lock().push(format!("server:{}", init.id));
                }
            }),
        );
        let log = received.clone();
        let _on_client = client.on(
            MessageKind::PoolInit,
            Arc::new(move |_: &SyncMessage| log.lock().push("client".to_string())),
        );
        let _ignored = server.on(
            MessageKind::Change,
            Arc::new(|_: &SyncMessage| panic!("wrong kind delivered")),
        );

        client.emit(SyncMessage::PoolInit(PoolInit { id: "p1".into() }));
        assert_eq!(*received.lock(), vec!["server:p1".to_string()]);
    }

    #[test]
    fn test_dropped_peer() {
        let (server, client) = MemoryTransport::pair();
        drop(server);
        client.emit(SyncMessage::PoolInit(PoolInit { id: "p1".into() }));
        assert_eq!(client.name(), "client");
    }
}
