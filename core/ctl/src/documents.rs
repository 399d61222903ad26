//! Document-store commands.

use serde_json::{json, Value};

use taskwatch_core::{DocumentStore, SqliteStore, StoreError};
use taskwatch_protocol::{collections, fields, Document, NotificationRecord, Task};

use crate::recording::render;

#[derive(Debug, Default)]
pub struct TaskFields {
    pub title: Option<String>,
    pub estimate: Option<f64>,
    pub status: Option<String>,
    pub actual_time: Option<i64>,
    pub job: Option<String>,
    pub notified: Option<bool>,
}

impl TaskFields {
    fn into_document(self) -> Document {
        let mut document = Document::new();
        if let Some(title) = self.title {
            document.insert(fields::TITLE.to_string(), Value::from(title));
        }
        if let Some(estimate) = self.estimate {
            document.insert(fields::ESTIMATED_TIME.to_string(), json!(estimate));
        }
        if let Some(status) = self.status {
            document.insert(fields::STATUS.to_string(), Value::from(status));
        }
        if let Some(actual_time) = self.actual_time {
            document.insert(fields::ACTUAL_TIME.to_string(), Value::from(actual_time));
        }
        if let Some(job) = self.job {
            document.insert(fields::JOB_ID.to_string(), Value::from(job));
        }
        if let Some(notified) = self.notified {
            document.insert(fields::IS_NOTIFIED.to_string(), Value::Bool(notified));
        }
        document
    }
}

pub fn put_task(store: &SqliteStore, id: &str, task: TaskFields) -> Result<String, String> {
    let document = task.into_document();
    if document.is_empty() {
        return Err("Nothing to write; pass at least one field".to_string());
    }
    upsert(store, collections::TASKS, id, document)?;
    show_task(store, id)
}

pub fn show_task(store: &SqliteStore, id: &str) -> Result<String, String> {
    let document = store
        .get_document(collections::TASKS, id)
        .map_err(|err| format!("Failed to read task {}: {}", id, err))?
        .ok_or_else(|| format!("No task {}", id))?;
    let task = Task::from_document(id, &document);
    render(&json!({
        "id": task.id,
        "document": document,
        "inProgress": task.is_in_progress(),
    }))
}

pub fn put_job(store: &SqliteStore, id: &str, mechanic_id: &str) -> Result<String, String> {
    let mut document = Document::new();
    document.insert(
        fields::ASSIGNED_MECHANIC_ID.to_string(),
        Value::from(mechanic_id),
    );
    upsert(store, collections::JOBS, id, document)?;
    Ok(format!("jobs/{} assigned to {}", id, mechanic_id))
}

pub fn put_mechanic(
    store: &SqliteStore,
    id: &str,
    name: Option<String>,
    device: Option<String>,
) -> Result<String, String> {
    let mut document = Document::new();
    if let Some(name) = name {
        document.insert(fields::NAME.to_string(), Value::from(name));
    }
    if let Some(device) = device {
        document.insert(fields::DEVICE_ID.to_string(), Value::from(device));
    }
    if document.is_empty() {
        return Err("Nothing to write; pass --name and/or --device".to_string());
    }
    upsert(store, collections::MECHANICS, id, document)?;
    Ok(format!("mechanics/{} updated", id))
}

pub fn list_notifications(store: &SqliteStore, mechanic_id: Option<&str>) -> Result<String, String> {
    let documents = store
        .list_documents(collections::NOTIFICATIONS)
        .map_err(|err| format!("Failed to list notifications: {}", err))?;

    let mut rows = Vec::new();
    for document in documents {
        let record = match NotificationRecord::from_document(&document.id, &document.data) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(id = %document.id, error = %err, "Skipping unreadable notification");
                continue;
            }
        };
        if mechanic_id.is_some_and(|id| id != record.mechanic_id) {
            continue;
        }
        rows.push(json!({
            "id": record.id,
            "mechanicId": record.mechanic_id,
            "type": record.kind.as_str(),
            "taskId": record.task_id,
            "title": record.title,
            "message": record.message,
            "created": record.created.to_rfc3339(),
            "read": record.read,
        }));
    }
    render(&Value::Array(rows))
}

/// Merges into an existing document, or creates it.
fn upsert(store: &SqliteStore, collection: &str, id: &str, document: Document) -> Result<(), String> {
    match store.update_document(collection, id, document.clone()) {
        Ok(()) => Ok(()),
        Err(StoreError::NotFound { .. }) => store
            .create_document(collection, id, document)
            .map_err(|err| format!("Failed to create {}/{}: {}", collection, id, err)),
        Err(err) => Err(format!("Failed to update {}/{}: {}", collection, id, err)),
    }
}
