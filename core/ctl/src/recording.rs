//! Live-store commands.

use serde_json::Value;

use taskwatch_core::{LiveStore, SqliteStore};
use taskwatch_protocol::{RecordingField, RecordingSnapshot, RecordingStatus};

pub fn start(
    store: &SqliteStore,
    key: &str,
    task_id: &str,
    device_id: &str,
    duration: i64,
) -> Result<String, String> {
    if task_id.trim().is_empty() {
        return Err("--task must not be empty".to_string());
    }
    if duration < 0 {
        return Err("--duration must be >= 0".to_string());
    }
    let snapshot = RecordingSnapshot {
        task_id: task_id.to_string(),
        device_id: device_id.to_string(),
        duration,
        status: RecordingStatus::Running,
        is_notified: false,
    };
    let payload = snapshot.to_value();
    store
        .put_recording(key, &payload)
        .map_err(|err| format!("Failed to start recording {}: {}", key, err))?;
    tracing::info!(key = %key, task_id = %task_id, duration, "Recording started");
    render(&payload)
}

pub fn set_duration(store: &SqliteStore, key: &str, seconds: i64) -> Result<String, String> {
    if seconds < 0 {
        return Err("duration must be >= 0".to_string());
    }
    store
        .set_field(key, RecordingField::Duration, Value::from(seconds))
        .map_err(|err| format!("Failed to set duration on {}: {}", key, err))?;
    Ok(format!("{} duration = {}", key, seconds))
}

pub fn stop(store: &SqliteStore, key: &str) -> Result<String, String> {
    let removed = store
        .remove_recording(key)
        .map_err(|err| format!("Failed to stop recording {}: {}", key, err))?;
    if !removed {
        return Err(format!("No recording under {}", key));
    }
    tracing::info!(key = %key, "Recording stopped");
    Ok(format!("{} stopped", key))
}

pub fn list(store: &SqliteStore) -> Result<String, String> {
    let recordings = store
        .get_all()
        .map_err(|err| format!("Failed to list recordings: {}", err))?;
    let object: serde_json::Map<String, Value> = recordings.into_iter().collect();
    render(&Value::Object(object))
}

pub(crate) fn render(value: &Value) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|err| format!("Failed to render output: {}", err))
}
