use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

use super::{
    DocumentStore, InsertResult, StoreCallback, StoreError, ID_FIELD, REV_FIELD,
};

/// SQLite-backed document store with CouchDB-style revisions.
///
/// Revisions look like `3-<32 hex chars>`: the write sequence number followed
/// by a prefix of the SHA-256 of the stored body.
pub struct SqliteStore {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                rev TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Current revision of `key`, if the document exists.
    pub fn revision(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT rev FROM documents WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Load a document with `_id` and `_rev` filled in.
    pub fn load(&self, key: &str) -> Result<Value, StoreError> {
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT body, rev FROM documents WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((body, rev)) = row else {
            return Err(StoreError::NotFound { key: key.to_string() });
        };

        let mut doc: Value = serde_json::from_str(&body)?;
        if let Some(fields) = doc.as_object_mut() {
            fields.insert(ID_FIELD.to_string(), Value::from(key));
            fields.insert(REV_FIELD.to_string(), Value::from(rev));
        }
        Ok(doc)
    }

    /// Write `doc` under `key`. The document's `_rev` must match the stored
    /// revision, or be absent when the key is new.
    pub fn save(&self, doc: Value, key: &str) -> Result<InsertResult, StoreError> {
        let mut body = doc;
        let Some(fields) = body.as_object_mut() else {
            return Err(StoreError::InvalidDocument { key: key.to_string() });
        };
        let supplied = fields
            .remove(REV_FIELD)
            .and_then(|rev| rev.as_str().map(str::to_string));
        fields.remove(ID_FIELD);

        let conn = self.conn.lock();
        let stored: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, rev FROM documents WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let stored_rev = stored.as_ref().map(|(_, rev)| rev.clone());
        if stored_rev != supplied {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                stored: stored_rev,
                supplied,
            });
        }

        let seq = stored.map(|(seq, _)| seq + 1).unwrap_or(1);
        let text = serde_json::to_string(&body)?;
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        let rev = format!("{}-{}", seq, &digest[..32]);

        conn.execute(
            "INSERT INTO documents (key, seq, rev, body, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                seq = excluded.seq,
                rev = excluded.rev,
                body = excluded.body,
                updated_at = excluded.updated_at",
            params![key, seq, rev, text, chrono::Utc::now().to_rfc3339()],
        )?;

        Ok(InsertResult {
            ok: true,
            id: key.to_string(),
            rev,
        })
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, key: &str, callback: StoreCallback<Value>) {
        callback(self.load(key));
    }

    fn insert(&self, doc: Value, key: &str, callback: StoreCallback<InsertResult>) {
        callback(self.save(doc, key));
    }
}
