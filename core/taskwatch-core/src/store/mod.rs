//! Narrow interfaces to the two external stores.
//!
//! The live store holds one JSON entry per in-progress recording, keyed by
//! mechanic id. The document store holds task metadata and the append-only
//! notification audit trail. Reconcilers only ever see these traits, so the
//! engine runs unchanged against SQLite, the in-memory store, or a hosted
//! backend adapter.

use serde_json::Value;
use std::collections::BTreeMap;

use taskwatch_protocol::{Document, RecordingField};

use crate::error::StoreError;

#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod sqlite;

#[cfg(any(test, feature = "test-helpers"))]
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait LiveStore: Send + Sync {
    /// Returns every entry in the live store, keyed by recording key.
    fn get_all(&self) -> StoreResult<BTreeMap<String, Value>>;

    /// Writes a single field of one recording without touching its siblings.
    fn set_field(&self, key: &str, field: RecordingField, value: Value) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    Eq,
    NotEq,
}

impl QueryOp {
    pub fn matches(self, actual: Option<&Value>, expected: &Value) -> bool {
        match self {
            QueryOp::Eq => actual == Some(expected),
            QueryOp::NotEq => actual != Some(expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Document,
}

pub trait DocumentStore: Send + Sync {
    fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    fn query_where(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: &Value,
    ) -> StoreResult<Vec<StoredDocument>>;

    /// Inserts with a store-generated id and returns it.
    fn add_document(&self, collection: &str, data: Document) -> StoreResult<String>;

    /// Inserts under a caller-chosen id. Fails with `AlreadyExists` rather
    /// than overwriting.
    fn create_document(&self, collection: &str, id: &str, data: Document) -> StoreResult<()>;

    /// Merges `fields` into an existing document.
    fn update_document(&self, collection: &str, id: &str, fields: Document) -> StoreResult<()>;
}

pub(crate) fn generate_document_id() -> String {
    ulid::Ulid::new().to_string()
}
