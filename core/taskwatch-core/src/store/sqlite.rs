//! SQLite-backed live store and document store.
//!
//! Used for local deployments and by the operator CLI. Both stores share one
//! database file: a `recordings` table (one JSON payload per recording key)
//! and a `documents` table keyed by `(collection, id)`. Partial writes go
//! through `json_set` / in-transaction merges so concurrent writers touching
//! different fields of the same entry do not clobber each other.

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use taskwatch_protocol::{Document, RecordingField};

use super::{generate_document_id, DocumentStore, LiveStore, QueryOp, StoreResult, StoredDocument};
use crate::error::StoreError;

const RECORDINGS_TABLE: &str = "recordings";

pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> StoreResult<Self> {
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates or replaces a whole recording entry.
    pub fn put_recording(&self, key: &str, payload: &Value) -> StoreResult<()> {
        let payload = serde_json::to_string(payload)
            .map_err(|err| StoreError::Malformed(format!("recording payload: {}", err)))?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO recordings (key, payload, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET \
                    payload = excluded.payload, \
                    updated_at = excluded.updated_at",
                params![key, payload, Utc::now().to_rfc3339()],
            )
            .map_err(|err| unavailable("upsert recording", err))?;
            Ok(())
        })
    }

    /// Returns whether an entry was removed.
    pub fn remove_recording(&self, key: &str) -> StoreResult<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM recordings WHERE key = ?1", params![key])
                .map_err(|err| unavailable("delete recording", err))?;
            Ok(removed > 0)
        })
    }

    /// Creates or replaces a whole document.
    pub fn put_document(&self, collection: &str, id: &str, data: &Document) -> StoreResult<()> {
        let payload = encode_document(data)?;
        let now = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, payload, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4) \
                 ON CONFLICT(collection, id) DO UPDATE SET \
                    payload = excluded.payload, \
                    updated_at = excluded.updated_at",
                params![collection, id, payload, now],
            )
            .map_err(|err| unavailable("upsert document", err))?;
            Ok(())
        })
    }

    /// Lists a collection in insertion order.
    pub fn list_documents(&self, collection: &str) -> StoreResult<Vec<StoredDocument>> {
        self.with_connection(|conn| load_collection(conn, collection))
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS recordings (
                    key TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS documents (
                    collection TEXT NOT NULL,
                    id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (collection, id)
                 );
                 CREATE INDEX IF NOT EXISTS documents_by_collection
                    ON documents (collection, created_at);
                 COMMIT;",
            )
            .map_err(|err| unavailable("initialize schema", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.open_connection()?;
        op(&mut conn)
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!("Failed to create store data dir: {}", err))
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| unavailable("open sqlite db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| unavailable("enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| unavailable("set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| unavailable("set busy_timeout", err))?;

        Ok(conn)
    }
}

impl LiveStore for SqliteStore {
    fn get_all(&self) -> StoreResult<BTreeMap<String, Value>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT key, payload FROM recordings")
                .map_err(|err| unavailable("prepare recordings query", err))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(|err| unavailable("read recording rows", err))?;

            let mut recordings = BTreeMap::new();
            for row in rows {
                let (key, payload) = row.map_err(|err| unavailable("decode recording row", err))?;
                // Malformed entries stay visible as `Null` so callers still see the key.
                let value = serde_json::from_str(&payload).unwrap_or_else(|err| {
                    tracing::warn!(key = %key, error = %err, "Recording payload is not valid JSON");
                    Value::Null
                });
                recordings.insert(key, value);
            }
            Ok(recordings)
        })
    }

    fn set_field(&self, key: &str, field: RecordingField, value: Value) -> StoreResult<()> {
        let json_path = format!("$.{}", field.as_str());
        let encoded = serde_json::to_string(&value)
            .map_err(|err| StoreError::Malformed(format!("field value: {}", err)))?;
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE recordings \
                     SET payload = json_set(payload, ?2, json(?3)), updated_at = ?4 \
                     WHERE key = ?1",
                    params![key, json_path, encoded, Utc::now().to_rfc3339()],
                )
                .map_err(|err| unavailable("update recording field", err))?;
            // Never resurrect an entry the client already removed.
            if updated == 0 {
                return Err(StoreError::not_found(RECORDINGS_TABLE, key));
            }
            Ok(())
        })
    }
}

impl DocumentStore for SqliteStore {
    fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let payload = self.with_connection(|conn| {
            conn.query_row(
                "SELECT payload FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| unavailable("query document", err))
        })?;
        payload.map(|payload| decode_document(&payload)).transpose()
    }

    fn query_where(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: &Value,
    ) -> StoreResult<Vec<StoredDocument>> {
        let documents = self.with_connection(|conn| load_collection(conn, collection))?;
        Ok(documents
            .into_iter()
            .filter(|document| op.matches(document.data.get(field), value))
            .collect())
    }

    fn add_document(&self, collection: &str, data: Document) -> StoreResult<String> {
        let id = generate_document_id();
        self.create_document(collection, &id, data)?;
        Ok(id)
    }

    fn create_document(&self, collection: &str, id: &str, data: Document) -> StoreResult<()> {
        let payload = encode_document(&data)?;
        let now = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            let inserted = conn
                .execute(
                    "INSERT INTO documents (collection, id, payload, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4) \
                     ON CONFLICT(collection, id) DO NOTHING",
                    params![collection, id, payload, now],
                )
                .map_err(|err| unavailable("insert document", err))?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    fn update_document(&self, collection: &str, id: &str, fields: Document) -> StoreResult<()> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| unavailable("begin transaction", err))?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT payload FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|err| unavailable("query document", err))?;
            let Some(current) = current else {
                return Err(StoreError::not_found(collection, id));
            };

            let mut merged = decode_document(&current)?;
            merged.extend(fields);
            tx.execute(
                "UPDATE documents SET payload = ?3, updated_at = ?4 \
                 WHERE collection = ?1 AND id = ?2",
                params![collection, id, encode_document(&merged)?, Utc::now().to_rfc3339()],
            )
            .map_err(|err| unavailable("update document", err))?;
            tx.commit().map_err(|err| unavailable("commit transaction", err))
        })
    }
}

fn load_collection(conn: &Connection, collection: &str) -> StoreResult<Vec<StoredDocument>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, payload FROM documents WHERE collection = ?1 \
             ORDER BY created_at ASC, id ASC",
        )
        .map_err(|err| unavailable("prepare collection query", err))?;
    let rows = stmt
        .query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|err| unavailable("read document rows", err))?;

    let mut documents = Vec::new();
    for row in rows {
        let (id, payload) = row.map_err(|err| unavailable("decode document row", err))?;
        match decode_document(&payload) {
            Ok(data) => documents.push(StoredDocument { id, data }),
            Err(err) => {
                tracing::warn!(collection = %collection, id = %id, error = %err, "Skipping malformed document");
            }
        }
    }
    Ok(documents)
}

fn encode_document(data: &Document) -> StoreResult<String> {
    serde_json::to_string(data).map_err(|err| StoreError::Malformed(err.to_string()))
}

fn decode_document(payload: &str) -> StoreResult<Document> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Malformed("document is not an object".to_string())),
        Err(err) => Err(StoreError::Malformed(err.to_string())),
    }
}

fn unavailable(action: &str, err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(format!("Failed to {}: {}", action, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SqliteStore::open(temp_dir.path().join("store.db")).expect("open store");
        (temp_dir, store)
    }

    fn object(value: Value) -> Document {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn set_field_preserves_sibling_fields() {
        let (_dir, store) = temp_store();
        store
            .put_recording(
                "mech-1",
                &json!({"taskId": "task-1", "duration": 100, "status": "running"}),
            )
            .expect("put recording");

        store
            .set_field("mech-1", RecordingField::Duration, json!(101))
            .expect("set duration");
        store
            .set_field("mech-1", RecordingField::IsNotified, json!(true))
            .expect("set notified");

        let all = store.get_all().expect("get all");
        let entry = &all["mech-1"];
        assert_eq!(entry["duration"], 101);
        assert_eq!(entry["isNotified"], true);
        assert_eq!(entry["taskId"], "task-1");
        assert_eq!(entry["status"], "running");
    }

    #[test]
    fn set_field_on_missing_recording_is_not_found() {
        let (_dir, store) = temp_store();
        let err = store
            .set_field("ghost", RecordingField::Duration, json!(1))
            .expect_err("missing recording");
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.get_all().expect("get all").is_empty());
    }

    #[test]
    fn remove_recording_drops_entry() {
        let (_dir, store) = temp_store();
        store
            .put_recording("mech-1", &json!({"status": "running"}))
            .expect("put");
        assert!(store.remove_recording("mech-1").expect("remove"));
        assert!(!store.remove_recording("mech-1").expect("remove again"));
        assert!(store.get_all().expect("get all").is_empty());
    }

    #[test]
    fn create_document_refuses_overwrite() {
        let (_dir, store) = temp_store();
        store
            .create_document("notifications", "n-1", object(json!({"title": "first"})))
            .expect("create");
        let err = store
            .create_document("notifications", "n-1", object(json!({"title": "second"})))
            .expect_err("duplicate id");
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let document = store
            .get_document("notifications", "n-1")
            .expect("get")
            .expect("exists");
        assert_eq!(document["title"], "first");
    }

    #[test]
    fn add_document_generates_distinct_ids() {
        let (_dir, store) = temp_store();
        let first = store
            .add_document("notifications", object(json!({"n": 1})))
            .expect("add");
        let second = store
            .add_document("notifications", object(json!({"n": 2})))
            .expect("add");
        assert_ne!(first, second);
        assert_eq!(store.list_documents("notifications").expect("list").len(), 2);
    }

    #[test]
    fn update_document_merges_fields() {
        let (_dir, store) = temp_store();
        store
            .put_document(
                "tasks",
                "task-1",
                &object(json!({"title": "Oil change", "isNotified": false})),
            )
            .expect("put");
        store
            .update_document("tasks", "task-1", object(json!({"isNotified": true})))
            .expect("update");

        let task = store.get_document("tasks", "task-1").expect("get").expect("exists");
        assert_eq!(task["title"], "Oil change");
        assert_eq!(task["isNotified"], true);
    }

    #[test]
    fn update_missing_document_is_not_found() {
        let (_dir, store) = temp_store();
        let err = store
            .update_document("tasks", "missing", object(json!({"isNotified": true})))
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn query_where_filters_on_field() {
        let (_dir, store) = temp_store();
        store
            .put_document("tasks", "a", &object(json!({"status": "inProgress"})))
            .expect("put a");
        store
            .put_document("tasks", "b", &object(json!({"status": "done"})))
            .expect("put b");
        store
            .put_document("jobs", "c", &object(json!({"status": "inProgress"})))
            .expect("put c");

        let matches = store
            .query_where("tasks", "status", QueryOp::Eq, &json!("inProgress"))
            .expect("query");
        let ids: Vec<_> = matches.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }
}
