use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use taskwatch_core::{DocumentStore, LiveStore, SqliteStore};
use taskwatch_protocol::{collections, fields, NotificationKind, NotificationRecord};

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_taskwatch-daemon"))
        .env("HOME", home)
        .env_remove("TASKWATCH_CONFIG")
        .env_remove("TASKWATCH_PUSH_TOKEN")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn taskwatch-daemon")
}

fn taskwatch_dir(home: &Path) -> PathBuf {
    home.join(".taskwatch")
}

fn write_config(home: &Path, body: &str) {
    let dir = taskwatch_dir(home);
    std::fs::create_dir_all(&dir).expect("create config dir");
    std::fs::write(dir.join("daemon.toml"), body).expect("write config");
}

fn wait_for<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(value) = check() {
            return Some(value);
        }
        sleep(Duration::from_millis(50));
    }
    None
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    wait_for(timeout, || child.try_wait().ok().flatten())
}

fn terminate(guard: &mut DaemonGuard) {
    #[allow(unsafe_code)]
    // SAFETY: kill(2) only takes plain integers; the pid is our own live child.
    let rc = unsafe { libc::kill(guard.child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);
    let status = wait_for_exit(&mut guard.child, Duration::from_secs(15))
        .expect("daemon did not exit after SIGTERM");
    assert!(status.success(), "unexpected exit status: {:?}", status);
}

fn put_document(store: &SqliteStore, collection: &str, id: &str, data: serde_json::Value) {
    store
        .put_document(collection, id, data.as_object().expect("document object"))
        .expect("seed document");
}

#[test]
fn daemon_keeps_silent_recording_alive_and_notifies_once() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(
        home.path(),
        r#"
[liveness]
interval_ms = 100
silence_threshold_secs = 1

[threshold]
interval_secs = 1
sources = ["live_recordings"]
live_recordings_unit = "seconds"
"#,
    );

    let store = SqliteStore::open(taskwatch_dir(home.path()).join("store.db")).expect("open store");
    store
        .put_recording(
            "mech-1",
            &json!({
                "taskId": "task-1",
                "deviceId": "device_mech-1_notification",
                "duration": 5,
                "status": "running",
                "isNotified": false
            }),
        )
        .expect("seed recording");
    put_document(
        &store,
        collections::TASKS,
        "task-1",
        json!({"title": "Brake pads", "estimatedTime": 8}),
    );

    let child = spawn_daemon(home.path());
    let mut guard = DaemonGuard { child };

    let advanced = wait_for(Duration::from_secs(10), || {
        let recordings = store.get_all().ok()?;
        let duration = recordings.get("mech-1")?.get("duration")?.as_i64()?;
        (duration >= 8).then_some(duration)
    });
    assert!(advanced.is_some(), "daemon never synthesized duration");

    let notified = wait_for(Duration::from_secs(10), || {
        let recordings = store.get_all().ok()?;
        let flag = recordings.get("mech-1")?.get("isNotified")?.as_bool()?;
        flag.then_some(())
    });
    assert!(notified.is_some(), "recording was never flagged as notified");

    let records = store
        .list_documents(collections::NOTIFICATIONS)
        .expect("list notifications");
    assert_eq!(records.len(), 1);
    let record = NotificationRecord::from_document(&records[0].id, &records[0].data)
        .expect("decode notification");
    assert_eq!(record.kind, NotificationKind::EstimatedTimeReached);
    assert_eq!(record.task_id, "task-1");
    assert_eq!(record.mechanic_id, "mech-1");
    assert!(store
        .get_document(collections::NOTIFICATIONS, &records[0].id)
        .expect("get notification")
        .is_some());

    terminate(&mut guard);
}

#[test]
fn daemon_flags_overrun_task_document() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(
        home.path(),
        r#"
[liveness]
interval_ms = 100

[threshold]
interval_secs = 1
sources = ["task_documents"]
task_documents_unit = "seconds"
"#,
    );

    let store = SqliteStore::open(taskwatch_dir(home.path()).join("store.db")).expect("open store");
    put_document(
        &store,
        collections::TASKS,
        "task-9",
        json!({
            "title": "Oil change",
            "estimatedTime": 60,
            "status": "inProgress",
            "actualTime": 90,
            "jobId": "job-1"
        }),
    );
    put_document(
        &store,
        collections::JOBS,
        "job-1",
        json!({"assignedMechanicId": "mech-2"}),
    );
    put_document(
        &store,
        collections::MECHANICS,
        "mech-2",
        json!({"name": "Ada", "deviceId": "device_mech-2_notification"}),
    );

    let child = spawn_daemon(home.path());
    let mut guard = DaemonGuard { child };

    let task = wait_for(Duration::from_secs(10), || {
        let task = store.get_document(collections::TASKS, "task-9").ok()??;
        let flag = task.get(fields::IS_NOTIFIED)?.as_bool()?;
        flag.then_some(task)
    })
    .expect("task was never flagged as notified");
    let notified_at = task
        .get(fields::NOTIFIED_AT)
        .and_then(|value| value.as_str())
        .expect("notifiedAt written with the flag");
    assert!(chrono::DateTime::parse_from_rfc3339(notified_at).is_ok());
    assert_eq!(task[fields::TITLE], "Oil change");

    let records = store
        .list_documents(collections::NOTIFICATIONS)
        .expect("list notifications");
    assert_eq!(records.len(), 1);
    let record = NotificationRecord::from_document(&records[0].id, &records[0].data)
        .expect("decode notification");
    assert_eq!(record.kind, NotificationKind::TaskTimeExceeded);
    assert_eq!(record.task_id, "task-9");
    assert_eq!(record.mechanic_id, "mech-2");
    assert!(!record.read);

    terminate(&mut guard);
}

#[test]
fn daemon_exits_nonzero_on_invalid_config() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(home.path(), "[liveness]\ninterval_ms = 0\n");

    let child = spawn_daemon(home.path());
    let mut guard = DaemonGuard { child };

    let status =
        wait_for_exit(&mut guard.child, Duration::from_secs(5)).expect("daemon did not exit");
    assert_eq!(status.code(), Some(1));
}

#[test]
fn daemon_exits_nonzero_when_push_token_missing() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(
        home.path(),
        "[push]\nendpoint = \"http://127.0.0.1:9/send\"\n",
    );

    let child = spawn_daemon(home.path());
    let mut guard = DaemonGuard { child };

    let status =
        wait_for_exit(&mut guard.child, Duration::from_secs(5)).expect("daemon did not exit");
    assert_eq!(status.code(), Some(1));
}
