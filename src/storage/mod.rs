//! Document store collaborator used by [`crate::sync::DocumentMirror`].
//!
//! The store speaks a CouchDB-like contract: documents are JSON objects keyed by
//! a string, every successful insert returns a fresh revision marker, and the
//! caller must echo the current `_rev` back to overwrite a document.

pub mod db;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use db::SqliteStore;

/// Reserved field carrying a document's revision marker.
pub const REV_FIELD: &str = "_rev";

/// Reserved field carrying a document's key.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document `{key}` not found")]
    NotFound { key: String },

    #[error("revision conflict on `{key}`: stored {stored:?}, supplied {supplied:?}")]
    Conflict {
        key: String,
        stored: Option<String>,
        supplied: Option<String>,
    },

    #[error("document `{key}` must be a JSON object")]
    InvalidDocument { key: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Outcome of a successful insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResult {
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

pub type StoreCallback<T> = Box<dyn FnOnce(Result<T, StoreError>) + Send>;

/// Callback-style document store. Implementations may invoke the callback
/// before returning or later from another context.
pub trait DocumentStore: Send + Sync {
    fn get(&self, key: &str, callback: StoreCallback<Value>);

    fn insert(&self, doc: Value, key: &str, callback: StoreCallback<InsertResult>);
}
