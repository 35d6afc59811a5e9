//! Error taxonomy for monitored trees, sync links and pools.
//!
//! Every variant is raised synchronously to the immediate caller. Nothing in
//! this crate retries internally: store write failures are logged by the
//! document mirror and otherwise swallowed so local mutation never blocks.

use thiserror::Error;

use crate::storage::StoreError;
use crate::tree::PathKey;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Only objects and arrays can be monitored.
    #[error("can only monitor objects and arrays, not {found}")]
    TypeKind { found: &'static str },

    #[error("trying to extend a non-extensible object with key `{key}`")]
    ExtensionDenied { key: PathKey },

    #[error(
        "assignment to `{key}` on a non-extensible object, use set_property()/delete_property() \
         instead or enable object extensibility"
    )]
    MutationDenied { key: PathKey },

    /// An intermediate path segment is missing on the local tree.
    #[error("path segment `{segment}` not found while walking {path:?}")]
    PathNotFound { path: Vec<PathKey>, segment: String },

    #[error("`{method}` is only available on monitored arrays")]
    NotAnArray { method: &'static str },

    #[error("key `{key}` cannot address an element of an array")]
    InvalidKey { key: PathKey },

    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SyncError {
    /// Errors caused by a malformed or out-of-order protocol message rather than
    /// by local misuse of the API.
    pub fn is_protocol(&self) -> bool {
        matches!(self, SyncError::PathNotFound { .. } | SyncError::InvalidKey { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Name of a JSON value's kind, as reported by [`SyncError::TypeKind`].
pub(crate) fn kind_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_protocol_errors() {
        let missing = SyncError::PathNotFound {
            path: vec![PathKey::from("a"), PathKey::from("b")],
            segment: "a".into(),
        };
        assert!(missing.is_protocol());

        let denied = SyncError::ExtensionDenied { key: PathKey::from("x") };
        assert!(!denied.is_protocol());
    }

    #[test]
    fn test_messages() {
        let err = SyncError::MutationDenied { key: PathKey::from("b") };
        assert!(err.to_string().contains("set_property()"));

        let err = SyncError::TypeKind { found: kind_name(&json!(3)) };
        assert_eq!(err.to_string(), "can only monitor objects and arrays, not number");
    }
}
