use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One step of a change path: an array index or an object field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    Index(usize),
    Field(String),
}

impl PathKey {
    /// Object field name for this key. Indices address their decimal form.
    pub fn as_field(&self) -> String {
        match self {
            PathKey::Index(i) => i.to_string(),
            PathKey::Field(name) => name.clone(),
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathKey::Index(i) => Some(*i),
            PathKey::Field(name) => name.parse().ok(),
        }
    }

    /// Parse a dotted path such as `c.z.1` into keys; all-digit segments become indices.
    pub fn parse_dotted(path: &str) -> Vec<PathKey> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.parse::<usize>() {
                Ok(index) => PathKey::Index(index),
                Err(_) => PathKey::Field(segment.to_string()),
            })
            .collect()
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Index(i) => write!(f, "{i}"),
            PathKey::Field(name) => f.write_str(name),
        }
    }
}

impl From<&str> for PathKey {
    fn from(value: &str) -> Self {
        PathKey::Field(value.to_string())
    }
}

impl From<String> for PathKey {
    fn from(value: String) -> Self {
        PathKey::Field(value)
    }
}

impl From<usize> for PathKey {
    fn from(value: usize) -> Self {
        PathKey::Index(value)
    }
}

/// Identifies one logical mutation across every hop of its propagation.
///
/// Echo suppression relies entirely on these being globally unique, hence the
/// random UUID default.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new() -> Self {
        Self(format!("id-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Set,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Set => f.write_str("set"),
            Action::Delete => f.write_str("delete"),
        }
    }
}

/// Path-addressed notification emitted for every mutation of a monitored tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub path: Vec<PathKey>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub transaction_id: TransactionId,
}

impl ChangeEvent {
    pub fn set(key: PathKey, value: Value, transaction_id: TransactionId) -> Self {
        Self {
            path: vec![key],
            action: Action::Set,
            value: Some(value),
            transaction_id,
        }
    }

    pub fn delete(key: PathKey, transaction_id: TransactionId) -> Self {
        Self {
            path: vec![key],
            action: Action::Delete,
            value: None,
            transaction_id,
        }
    }

    /// The same event as seen from a parent that owns the emitter under `key`.
    pub fn prefixed(&self, key: PathKey) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(key);
        path.extend(self.path.iter().cloned());
        Self {
            path,
            action: self.action,
            value: self.value.clone(),
            transaction_id: self.transaction_id.clone(),
        }
    }

    pub fn dotted_path(&self) -> String {
        self.path
            .iter()
            .map(PathKey::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Property-level notification, emitted only by the tree that owns the key.
#[derive(Debug, Clone, PartialEq)]
pub struct SetEvent {
    pub key: PathKey,
    pub value: Value,
    pub transaction_id: TransactionId,
}

/// Emitted after every array operation, mutating or not.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: &'static str,
    pub args: Vec<Value>,
}
