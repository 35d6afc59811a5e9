//! Bidirectional message channels between sync pools.
//!
//! A transport only has to deliver [`SyncMessage`]s emitted on one end to the
//! handlers registered on the other end. Delivery is fire-and-forget: nothing
//! is acknowledged, retried or reordered.

pub mod memory;
pub mod ws;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::notifier::{Notifier, Subscription};
use crate::sync::protocol::{MessageKind, SyncMessage};

pub use memory::MemoryTransport;
pub use ws::WsTransport;

pub type MessageHandler = Arc<dyn Fn(&SyncMessage) + Send + Sync>;

pub trait Transport: Send + Sync {
    /// Send `message` to the peer. Never blocks and never fails; delivery
    /// problems are logged by the implementation.
    fn emit(&self, message: SyncMessage);

    /// Register `handler` for inbound messages of `kind`.
    fn on(&self, kind: MessageKind, handler: MessageHandler) -> Subscription;
}

/// Inbound fan-out shared by transport implementations.
#[derive(Default)]
pub struct Dispatcher {
    inbound: Notifier<SyncMessage>,
}

impl Dispatcher {
    pub fn on(&self, kind: MessageKind, handler: MessageHandler) -> Subscription {
        self.inbound.subscribe(move |message: &SyncMessage| {
            if message.kind() == kind {
                handler(message);
            }
        })
    }

    pub fn dispatch(&self, message: &SyncMessage) {
        self.inbound.notify(message);
    }
}

/// Frame encoding for network transports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// CBOR binary frames.
    Cbor,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => f.write_str("json"),
            WireFormat::Cbor => f.write_str("cbor"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "cbor" => Ok(WireFormat::Cbor),
            other => Err(anyhow::anyhow!("unknown wire format: {other}")),
        }
    }
}
