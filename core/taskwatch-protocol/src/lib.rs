//! Store schema types for taskwatch.
//!
//! This crate is shared by the engine, the daemon and the operator CLI to
//! prevent schema drift. Both the live store and the document store speak
//! camelCase JSON; the types here read that JSON leniently (missing fields
//! fall back to defaults) because the mobile client is the primary writer and
//! older builds omit fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document body in the document store.
pub type Document = Map<String, Value>;

pub const RECORDING_STATUS_RUNNING: &str = "running";
pub const TASK_STATUS_IN_PROGRESS: &str = "inProgress";

/// Document store collection names.
pub mod collections {
    pub const TASKS: &str = "tasks";
    pub const JOBS: &str = "jobs";
    pub const MECHANICS: &str = "mechanics";
    pub const NOTIFICATIONS: &str = "notifications";
}

/// Document field names the engine reads or writes.
pub mod fields {
    pub const IS_NOTIFIED: &str = "isNotified";
    pub const NOTIFIED_AT: &str = "notifiedAt";
    pub const STATUS: &str = "status";
    pub const TITLE: &str = "title";
    pub const ESTIMATED_TIME: &str = "estimatedTime";
    pub const ACTUAL_TIME: &str = "actualTime";
    pub const JOB_ID: &str = "jobId";
    pub const ASSIGNED_MECHANIC_ID: &str = "assignedMechanicId";
    pub const NAME: &str = "name";
    pub const DEVICE_ID: &str = "deviceId";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordingStatus {
    Running,
    /// Any terminal or paused value. Kept verbatim for logging.
    Inactive(String),
}

impl From<String> for RecordingStatus {
    fn from(value: String) -> Self {
        if value == RECORDING_STATUS_RUNNING {
            Self::Running
        } else {
            Self::Inactive(value)
        }
    }
}

impl From<RecordingStatus> for String {
    fn from(value: RecordingStatus) -> Self {
        match value {
            RecordingStatus::Running => RECORDING_STATUS_RUNNING.to_string(),
            RecordingStatus::Inactive(value) => value,
        }
    }
}

/// Fields of a live recording the engine is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingField {
    Duration,
    IsNotified,
}

impl RecordingField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duration => "duration",
            Self::IsNotified => fields::IS_NOTIFIED,
        }
    }
}

/// One entry of the live store, keyed by mechanic id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSnapshot {
    pub task_id: String,
    pub device_id: String,
    /// Elapsed seconds.
    pub duration: i64,
    pub status: RecordingStatus,
    pub is_notified: bool,
}

impl RecordingSnapshot {
    /// Returns `None` when the entry is not a JSON object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            task_id: read_string(object, "taskId").unwrap_or_default(),
            device_id: read_string(object, fields::DEVICE_ID).unwrap_or_default(),
            duration: read_i64(object, "duration").unwrap_or(0),
            status: RecordingStatus::from(read_string(object, fields::STATUS).unwrap_or_default()),
            is_notified: read_bool(object, fields::IS_NOTIFIED).unwrap_or(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.status == RecordingStatus::Running
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    /// Raw estimate; the unit depends on which data path wrote it.
    pub estimated_time: f64,
    pub is_notified: bool,
    pub status: String,
    /// Seconds recorded against the task by the client.
    pub actual_time: i64,
    pub job_id: Option<String>,
}

impl Task {
    pub fn from_document(id: &str, document: &Document) -> Self {
        Self {
            id: id.to_string(),
            title: read_string(document, fields::TITLE)
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| "Task".to_string()),
            estimated_time: read_f64(document, fields::ESTIMATED_TIME).unwrap_or(0.0),
            is_notified: read_bool(document, fields::IS_NOTIFIED).unwrap_or(false),
            status: read_string(document, fields::STATUS).unwrap_or_default(),
            actual_time: read_i64(document, fields::ACTUAL_TIME).unwrap_or(0),
            job_id: read_string(document, fields::JOB_ID).filter(|id| !id.trim().is_empty()),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == TASK_STATUS_IN_PROGRESS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Job {
    pub assigned_mechanic_id: Option<String>,
}

impl Job {
    pub fn from_document(document: &Document) -> Self {
        Self {
            assigned_mechanic_id: read_string(document, fields::ASSIGNED_MECHANIC_ID)
                .filter(|id| !id.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mechanic {
    pub name: Option<String>,
    pub device_id: Option<String>,
}

impl Mechanic {
    pub fn from_document(document: &Document) -> Self {
        Self {
            name: read_string(document, fields::NAME).filter(|name| !name.trim().is_empty()),
            device_id: read_string(document, fields::DEVICE_ID).filter(|id| !id.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Raised from the live-recording path.
    EstimatedTimeReached,
    /// Raised from the task-document path.
    TaskTimeExceeded,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EstimatedTimeReached => "estimated_time_reached",
            Self::TaskTimeExceeded => "task_time_exceeded",
        }
    }
}

/// Append-only audit entry in the `notifications` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(skip)]
    pub id: String,
    pub mechanic_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub task_id: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl NotificationRecord {
    pub fn to_document(&self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        }
    }

    pub fn from_document(id: &str, document: &Document) -> Result<Self, serde_json::Error> {
        let mut record: Self = serde_json::from_value(Value::Object(document.clone()))?;
        record.id = id.to_string();
        Ok(record)
    }
}

fn read_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn read_i64(object: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = object.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|float| float.trunc() as i64))
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

fn read_f64(object: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = object.get(key)?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

fn read_bool(object: &Map<String, Value>, key: &str) -> Option<bool> {
    object.get(key)?.as_bool()
}
