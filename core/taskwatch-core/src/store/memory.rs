//! In-process store with failure injection, for tests.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use taskwatch_protocol::{Document, RecordingField};

use super::{generate_document_id, DocumentStore, LiveStore, QueryOp, StoreResult, StoredDocument};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub key: String,
    pub field: RecordingField,
    pub value: Value,
}

#[derive(Default)]
struct Inner {
    recordings: BTreeMap<String, Value>,
    documents: BTreeMap<String, BTreeMap<String, Document>>,
    field_writes: Vec<FieldWrite>,
    fail_live_reads: bool,
    fail_field_writes: HashSet<String>,
    fail_creates: HashSet<String>,
    fail_updates: HashSet<String>,
}

/// Implements both `LiveStore` and `DocumentStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_recording(&self, key: &str, value: Value) {
        self.lock().recordings.insert(key.to_string(), value);
    }

    pub fn remove_recording(&self, key: &str) {
        self.lock().recordings.remove(key);
    }

    pub fn recording(&self, key: &str) -> Option<Value> {
        self.lock().recordings.get(key).cloned()
    }

    /// Simulates the owning client pushing a new duration.
    pub fn set_duration(&self, key: &str, duration: i64) {
        if let Some(Value::Object(entry)) = self.lock().recordings.get_mut(key) {
            entry.insert("duration".to_string(), Value::from(duration));
        }
    }

    pub fn insert_document(&self, collection: &str, id: &str, value: Value) {
        let data = match value {
            Value::Object(map) => map,
            _ => Document::new(),
        };
        self.lock()
            .documents
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock()
            .documents
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn documents(&self, collection: &str) -> Vec<StoredDocument> {
        self.lock()
            .documents
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| StoredDocument {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every `set_field` call that succeeded, in order.
    pub fn field_writes(&self) -> Vec<FieldWrite> {
        self.lock().field_writes.clone()
    }

    pub fn fail_live_reads(&self, fail: bool) {
        self.lock().fail_live_reads = fail;
    }

    pub fn fail_field_writes(&self, key: &str, fail: bool) {
        let mut inner = self.lock();
        if fail {
            inner.fail_field_writes.insert(key.to_string());
        } else {
            inner.fail_field_writes.remove(key);
        }
    }

    pub fn fail_creates(&self, collection: &str, fail: bool) {
        let mut inner = self.lock();
        if fail {
            inner.fail_creates.insert(collection.to_string());
        } else {
            inner.fail_creates.remove(collection);
        }
    }

    pub fn fail_updates(&self, collection: &str, fail: bool) {
        let mut inner = self.lock();
        if fail {
            inner.fail_updates.insert(collection.to_string());
        } else {
            inner.fail_updates.remove(collection);
        }
    }
}

impl LiveStore for MemoryStore {
    fn get_all(&self) -> StoreResult<BTreeMap<String, Value>> {
        let inner = self.lock();
        if inner.fail_live_reads {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(inner.recordings.clone())
    }

    fn set_field(&self, key: &str, field: RecordingField, value: Value) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.fail_field_writes.contains(key) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        let Some(Value::Object(entry)) = inner.recordings.get_mut(key) else {
            return Err(StoreError::not_found("recordings", key));
        };
        entry.insert(field.as_str().to_string(), value.clone());
        inner.field_writes.push(FieldWrite {
            key: key.to_string(),
            field,
            value,
        });
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.document(collection, id))
    }

    fn query_where(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: &Value,
    ) -> StoreResult<Vec<StoredDocument>> {
        Ok(self
            .documents(collection)
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
        let mut inner = self.lock();
        if inner.fail_creates.contains(collection) {
            return Err(StoreError::Unavailable("injected create failure".to_string()));
        }
        let docs = inner.documents.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        docs.insert(id.to_string(), data);
        Ok(())
    }

    fn update_document(&self, collection: &str, id: &str, fields: Document) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.fail_updates.contains(collection) {
            return Err(StoreError::Unavailable("injected update failure".to_string()));
        }
        let document = inner
            .documents
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        document.extend(fields);
        Ok(())
    }
}
