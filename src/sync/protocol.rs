// Wire messages exchanged by sync pools over a transport.
//
// Messages are adjacently tagged so every frame reads
// `{"event": "sync:change", "data": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tree::{Action, PathKey, TransactionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SyncMessage {
    /// A client pool announcing its id.
    #[serde(rename = "sync:poolInit")]
    PoolInit(PoolInit),

    #[serde(rename = "sync:create")]
    Create(CreateObject),

    #[serde(rename = "sync:change")]
    Change(ChangeMessage),
}

impl SyncMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::PoolInit(_) => MessageKind::PoolInit,
            SyncMessage::Create(_) => MessageKind::Create,
            SyncMessage::Change(_) => MessageKind::Change,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PoolInit,
    Create,
    Change,
}

impl MessageKind {
    pub fn event_name(self) -> &'static str {
        match self {
            MessageKind::PoolInit => "sync:poolInit",
            MessageKind::Create => "sync:create",
            MessageKind::Change => "sync:change",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInit {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateObject {
    pub pool_id: String,
    pub obj_id: String,
    pub obj: Value,
    #[serde(default)]
    pub extensible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMessage {
    /// Object name within the pool.
    pub id: String,
    pub path: Vec<PathKey>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub transaction_id: TransactionId,
    /// Older peers omit this; when present it must match the receiving pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
}
