//! Threshold detection: notify exactly once when observed time reaches the
//! task's estimate.
//!
//! Two candidate sources feed the same reconciler:
//!
//! - `LiveRecordingCandidates` scans running, un-notified recordings and flags
//!   the recording itself.
//! - `TaskDocumentCandidates` scans in-progress, un-notified task documents,
//!   resolves the mechanic through the job, and flags the task document.
//!
//! The two `isNotified` flags are independent. The flag is only set after the
//! notification pipeline has written its audit record, so a failed audit write
//! means the candidate is retried next tick.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use taskwatch_protocol::{
    collections, fields, Document, Job, Mechanic, NotificationKind, RecordingField,
    RecordingSnapshot, Task, TASK_STATUS_IN_PROGRESS,
};

use crate::config::SourceKind;
use crate::error::{MonitorError, StoreError};
use crate::notify::{NotificationPipeline, NotificationRequest};
use crate::scheduler::PeriodicTask;
use crate::store::{DocumentStore, LiveStore, QueryOp, StoreResult};

// ═══════════════════════════════════════════════════════════════════════════════
// Estimate units
// ═══════════════════════════════════════════════════════════════════════════════

/// Unit of a task's `estimatedTime`, fixed per candidate source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateUnit {
    Hours,
    Seconds,
}

impl EstimateUnit {
    pub fn to_seconds(self, estimated_time: f64) -> i64 {
        match self {
            Self::Hours => estimated_seconds_from_hours(estimated_time),
            Self::Seconds => estimated_seconds_from_seconds(estimated_time),
        }
    }
}

/// Truncates toward zero. Non-finite input yields 0, which disables the check.
pub fn estimated_seconds_from_hours(hours: f64) -> i64 {
    if !hours.is_finite() {
        return 0;
    }
    (hours * 3600.0).trunc() as i64
}

pub fn estimated_seconds_from_seconds(seconds: f64) -> i64 {
    if !seconds.is_finite() {
        return 0;
    }
    seconds.trunc() as i64
}

// ═══════════════════════════════════════════════════════════════════════════════
// Candidate sources
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Recording key or task id, depending on the source.
    pub key: String,
    pub task_id: String,
    pub duration: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub mechanic_id: String,
    pub device_address: Option<String>,
}

pub trait CandidateSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn notification_kind(&self) -> NotificationKind;

    fn candidates(&self) -> StoreResult<Vec<Candidate>>;

    /// Fresh read of the task backing a candidate.
    fn load_task(&self, candidate: &Candidate) -> StoreResult<Option<Task>>;

    /// Whether the authoritative flag for this source is already set on the
    /// freshly loaded task.
    fn already_notified(&self, _task: &Task) -> bool {
        false
    }

    fn resolve_recipient(
        &self,
        candidate: &Candidate,
        task: &Task,
    ) -> Result<Recipient, MonitorError>;

    fn mark_notified(&self, candidate: &Candidate, now: DateTime<Utc>) -> StoreResult<()>;
}

pub struct LiveRecordingCandidates {
    live: Arc<dyn LiveStore>,
    documents: Arc<dyn DocumentStore>,
}

impl LiveRecordingCandidates {
    pub fn new(live: Arc<dyn LiveStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self { live, documents }
    }
}

impl CandidateSource for LiveRecordingCandidates {
    fn kind(&self) -> SourceKind {
        SourceKind::LiveRecordings
    }

    fn notification_kind(&self) -> NotificationKind {
        NotificationKind::EstimatedTimeReached
    }

    fn candidates(&self) -> StoreResult<Vec<Candidate>> {
        let recordings = self.live.get_all()?;
        Ok(recordings
            .iter()
            .filter_map(|(key, value)| {
                let snapshot = RecordingSnapshot::from_value(value)?;
                let eligible = snapshot.is_running()
                    && !snapshot.is_notified
                    && !snapshot.task_id.trim().is_empty();
                eligible.then(|| Candidate {
                    key: key.clone(),
                    task_id: snapshot.task_id,
                    duration: snapshot.duration,
                })
            })
            .collect())
    }

    fn load_task(&self, candidate: &Candidate) -> StoreResult<Option<Task>> {
        load_task_document(self.documents.as_ref(), &candidate.task_id)
    }

    fn resolve_recipient(
        &self,
        candidate: &Candidate,
        _task: &Task,
    ) -> Result<Recipient, MonitorError> {
        let device_address = self
            .live
            .get_all()?
            .get(&candidate.key)
            .and_then(RecordingSnapshot::from_value)
            .map(|snapshot| snapshot.device_id)
            .filter(|address| !address.trim().is_empty());
        Ok(Recipient {
            mechanic_id: candidate.key.clone(),
            device_address,
        })
    }

    fn mark_notified(&self, candidate: &Candidate, _now: DateTime<Utc>) -> StoreResult<()> {
        self.live
            .set_field(&candidate.key, RecordingField::IsNotified, Value::Bool(true))
    }
}

pub struct TaskDocumentCandidates {
    documents: Arc<dyn DocumentStore>,
    live: Arc<dyn LiveStore>,
}

impl TaskDocumentCandidates {
    pub fn new(documents: Arc<dyn DocumentStore>, live: Arc<dyn LiveStore>) -> Self {
        Self { documents, live }
    }

    /// `mechanics/{id}.deviceId`, else the mechanic's live recording when it is
    /// for the same task.
    fn resolve_address(&self, mechanic_id: &str, task_id: &str) -> Option<String> {
        match self
            .documents
            .get_document(collections::MECHANICS, mechanic_id)
        {
            Ok(Some(document)) => {
                if let Some(address) = Mechanic::from_document(&document).device_id {
                    return Some(address);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    mechanic_id = %mechanic_id,
                    error = %err,
                    "Failed to read mechanic device address"
                );
            }
        }

        match self.live.get_all() {
            Ok(recordings) => recordings
                .get(mechanic_id)
                .and_then(RecordingSnapshot::from_value)
                .filter(|snapshot| snapshot.task_id == task_id)
                .map(|snapshot| snapshot.device_id)
                .filter(|address| !address.trim().is_empty()),
            Err(err) => {
                tracing::warn!(
                    mechanic_id = %mechanic_id,
                    error = %err,
                    "Failed to read live recording for device address"
                );
                None
            }
        }
    }
}

impl CandidateSource for TaskDocumentCandidates {
    fn kind(&self) -> SourceKind {
        SourceKind::TaskDocuments
    }

    fn notification_kind(&self) -> NotificationKind {
        NotificationKind::TaskTimeExceeded
    }

    fn candidates(&self) -> StoreResult<Vec<Candidate>> {
        let documents = self.documents.query_where(
            collections::TASKS,
            fields::STATUS,
            QueryOp::Eq,
            &Value::from(TASK_STATUS_IN_PROGRESS),
        )?;
        // Tasks written before the flag existed have no `isNotified` at all.
        Ok(documents
            .iter()
            .map(|document| Task::from_document(&document.id, &document.data))
            .filter(|task| !task.is_notified)
            .map(|task| Candidate {
                key: task.id.clone(),
                task_id: task.id,
                duration: task.actual_time,
            })
            .collect())
    }

    fn load_task(&self, candidate: &Candidate) -> StoreResult<Option<Task>> {
        load_task_document(self.documents.as_ref(), &candidate.task_id)
    }

    fn already_notified(&self, task: &Task) -> bool {
        task.is_notified
    }

    fn resolve_recipient(
        &self,
        _candidate: &Candidate,
        task: &Task,
    ) -> Result<Recipient, MonitorError> {
        let job_id = task
            .job_id
            .as_deref()
            .ok_or_else(|| MonitorError::NotFound(format!("jobId on tasks/{}", task.id)))?;
        let job = self
            .documents
            .get_document(collections::JOBS, job_id)?
            .map(|document| Job::from_document(&document))
            .ok_or_else(|| MonitorError::NotFound(format!("{}/{}", collections::JOBS, job_id)))?;
        let mechanic_id = job.assigned_mechanic_id.ok_or_else(|| {
            MonitorError::NotFound(format!("assignedMechanicId on jobs/{}", job_id))
        })?;

        let device_address = self.resolve_address(&mechanic_id, &task.id);
        Ok(Recipient {
            mechanic_id,
            device_address,
        })
    }

    fn mark_notified(&self, candidate: &Candidate, now: DateTime<Utc>) -> StoreResult<()> {
        let mut update = Document::new();
        update.insert(fields::IS_NOTIFIED.to_string(), Value::Bool(true));
        update.insert(fields::NOTIFIED_AT.to_string(), Value::from(now.to_rfc3339()));
        self.documents
            .update_document(collections::TASKS, &candidate.task_id, update)
    }
}

fn load_task_document(documents: &dyn DocumentStore, task_id: &str) -> StoreResult<Option<Task>> {
    Ok(documents
        .get_document(collections::TASKS, task_id)?
        .map(|document| Task::from_document(task_id, &document)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reconciler
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdReport {
    pub candidates: usize,
    pub notified: usize,
    /// Notified candidates whose push failed; also counted in `notified`.
    pub delivery_failed: usize,
    pub below_threshold: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum CandidateResult {
    Notified { delivered: bool },
    BelowThreshold,
    Skipped,
    Failed,
}

pub struct ThresholdReconciler {
    source: Box<dyn CandidateSource>,
    pipeline: Arc<NotificationPipeline>,
    unit: EstimateUnit,
}

impl ThresholdReconciler {
    pub fn new(
        source: Box<dyn CandidateSource>,
        pipeline: Arc<NotificationPipeline>,
        unit: EstimateUnit,
    ) -> Self {
        Self {
            source,
            pipeline,
            unit,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) -> ThresholdReport {
        let mut report = ThresholdReport::default();
        let source = self.source_kind().as_str();

        let candidates = match self.source.candidates() {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(source, error = %err, "Failed to fetch threshold candidates");
                return report;
            }
        };
        report.candidates = candidates.len();

        for candidate in &candidates {
            match self.evaluate(candidate, now) {
                CandidateResult::Notified { delivered } => {
                    report.notified += 1;
                    if !delivered {
                        report.delivery_failed += 1;
                    }
                }
                CandidateResult::BelowThreshold => report.below_threshold += 1,
                CandidateResult::Skipped => report.skipped += 1,
                CandidateResult::Failed => report.failed += 1,
            }
        }

        report
    }

    fn evaluate(&self, candidate: &Candidate, now: DateTime<Utc>) -> CandidateResult {
        let source = self.source_kind().as_str();

        let task = match self.source.load_task(candidate) {
            Ok(Some(task)) => task,
            Ok(None) => {
                let err = MonitorError::from(StoreError::not_found(
                    collections::TASKS,
                    &candidate.task_id,
                ));
                tracing::warn!(
                    source,
                    key = %candidate.key,
                    error = %err,
                    "Skipping candidate without task document"
                );
                return CandidateResult::Skipped;
            }
            Err(err) => {
                tracing::warn!(
                    source,
                    task_id = %candidate.task_id,
                    error = %err,
                    "Failed to load task"
                );
                return CandidateResult::Skipped;
            }
        };

        if self.source.already_notified(&task) {
            tracing::debug!(source, task_id = %task.id, "Task already notified");
            return CandidateResult::Skipped;
        }

        let estimated_secs = self.unit.to_seconds(task.estimated_time);
        if estimated_secs <= 0 || candidate.duration <= 0 {
            return CandidateResult::Skipped;
        }
        if candidate.duration < estimated_secs {
            return CandidateResult::BelowThreshold;
        }

        let recipient = match self.source.resolve_recipient(candidate, &task) {
            Ok(recipient) => recipient,
            Err(err) => {
                tracing::warn!(
                    source,
                    task_id = %task.id,
                    error = %err,
                    "Skipping candidate without recipient"
                );
                return CandidateResult::Skipped;
            }
        };

        tracing::info!(
            source,
            task_id = %task.id,
            mechanic_id = %recipient.mechanic_id,
            duration = candidate.duration,
            estimated_secs,
            "Estimated time reached"
        );

        let request = NotificationRequest {
            recipient_id: recipient.mechanic_id,
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            device_address: recipient.device_address,
            duration_secs: candidate.duration,
            estimated_secs,
            kind: self.source.notification_kind(),
        };
        let delivered = match self.pipeline.notify(&request, now) {
            Ok(outcome) => match outcome.delivery_result() {
                Ok(()) => true,
                Err(err) => {
                    tracing::debug!(source, task_id = %task.id, error = %err, "Push not delivered");
                    false
                }
            },
            Err(err) => {
                tracing::warn!(
                    source,
                    task_id = %task.id,
                    error = %err,
                    "Notification failed; will retry next tick"
                );
                return CandidateResult::Failed;
            }
        };

        match self.source.mark_notified(candidate, now) {
            Ok(()) => CandidateResult::Notified { delivered },
            Err(err) => {
                let err = MonitorError::from(err);
                tracing::warn!(
                    source,
                    task_id = %task.id,
                    key = %candidate.key,
                    error = %err,
                    "Notification recorded but isNotified flag was not set"
                );
                CandidateResult::Failed
            }
        }
    }
}

impl PeriodicTask for ThresholdReconciler {
    fn name(&self) -> String {
        format!("threshold-{}", self.source_kind().as_str())
    }

    fn run_tick(&mut self) {
        let report = self.tick_at(Utc::now());
        tracing::debug!(
            source = self.source_kind().as_str(),
            candidates = report.candidates,
            notified = report.notified,
            delivery_failed = report.delivery_failed,
            below_threshold = report.below_threshold,
            skipped = report.skipped,
            failed = report.failed,
            "Threshold tick complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::push::{PlaceholderAddressPolicy, PushMessage, PushService};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingPush {
        sent: Mutex<Vec<PushMessage>>,
        fail: bool,
    }

    impl CountingPush {
        fn count(&self) -> usize {
            self.sent.lock().expect("lock").len()
        }
    }

    impl PushService for CountingPush {
        fn send(&self, message: &PushMessage) -> Result<String, DeliveryError> {
            self.sent.lock().expect("lock").push(message.clone());
            if self.fail {
                Err(DeliveryError::Transient("connection reset".to_string()))
            } else {
                Ok("msg-1".to_string())
            }
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-30T12:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn pipeline(store: &Arc<MemoryStore>, push: &Arc<CountingPush>) -> Arc<NotificationPipeline> {
        Arc::new(NotificationPipeline::new(
            store.clone(),
            push.clone(),
            Arc::new(PlaceholderAddressPolicy::default()),
        ))
    }

    fn live_reconciler(store: &Arc<MemoryStore>, push: &Arc<CountingPush>) -> ThresholdReconciler {
        ThresholdReconciler::new(
            Box::new(LiveRecordingCandidates::new(store.clone(), store.clone())),
            pipeline(store, push),
            EstimateUnit::Hours,
        )
    }

    fn task_reconciler(store: &Arc<MemoryStore>, push: &Arc<CountingPush>) -> ThresholdReconciler {
        ThresholdReconciler::new(
            Box::new(TaskDocumentCandidates::new(store.clone(), store.clone())),
            pipeline(store, push),
            EstimateUnit::Hours,
        )
    }

    fn seed_recording(store: &MemoryStore, duration: i64) {
        store.insert_recording(
            "mech-1",
            json!({
                "taskId": "task-1",
                "deviceId": "real-token",
                "duration": duration,
                "status": "running",
                "isNotified": false
            }),
        );
        store.insert_document(
            collections::TASKS,
            "task-1",
            json!({"title": "Brake pads", "estimatedTime": 1}),
        );
    }

    fn seed_task_path(store: &MemoryStore, actual_time: i64) {
        store.insert_document(
            collections::TASKS,
            "task-9",
            json!({
                "title": "Oil change",
                "estimatedTime": 1.5,
                "status": "inProgress",
                "actualTime": actual_time,
                "jobId": "job-1"
            }),
        );
        store.insert_document(
            collections::JOBS,
            "job-1",
            json!({"assignedMechanicId": "mech-2"}),
        );
        store.insert_document(
            collections::MECHANICS,
            "mech-2",
            json!({"name": "Ada", "deviceId": "token-ada"}),
        );
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(estimated_seconds_from_hours(1.0), 3600);
        assert_eq!(estimated_seconds_from_hours(1.5), 5400);
        assert_eq!(estimated_seconds_from_hours(0.0001), 0);
        assert_eq!(estimated_seconds_from_hours(f64::INFINITY), 0);
        assert_eq!(estimated_seconds_from_seconds(90.9), 90);
        assert_eq!(EstimateUnit::Seconds.to_seconds(3600.0), 3600);
        assert_eq!(EstimateUnit::Hours.to_seconds(2.0), 7200);
    }

    #[test]
    fn one_hour_estimate_fires_at_exactly_3600() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_recording(&store, 3599);
        let mut reconciler = live_reconciler(&store, &push);

        let report = reconciler.tick_at(now());
        assert_eq!(report.below_threshold, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(push.count(), 0);

        store.set_duration("mech-1", 3600);
        let report = reconciler.tick_at(now());
        assert_eq!(report.notified, 1);
        assert_eq!(report.delivery_failed, 0);
        assert_eq!(push.count(), 1);
        let recording = store.recording("mech-1").expect("recording");
        assert_eq!(recording["isNotified"], json!(true));
        assert_eq!(recording[fields::NOTIFIED_AT], Value::Null);
        assert_eq!(store.documents(collections::NOTIFICATIONS).len(), 1);
    }

    #[test]
    fn notified_recording_is_never_renotified() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_recording(&store, 4000);
        let mut reconciler = live_reconciler(&store, &push);

        reconciler.tick_at(now());
        store.set_duration("mech-1", 5000);
        let report = reconciler.tick_at(now());
        reconciler.tick_at(now());

        assert_eq!(report.candidates, 0);
        assert_eq!(push.count(), 1);
        assert_eq!(store.documents(collections::NOTIFICATIONS).len(), 1);
    }

    #[test]
    fn push_failure_still_sets_flag() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush {
            fail: true,
            ..CountingPush::default()
        });
        seed_recording(&store, 3600);
        let mut reconciler = live_reconciler(&store, &push);

        let report = reconciler.tick_at(now());

        assert_eq!(report.notified, 1);
        assert_eq!(report.delivery_failed, 1);
        assert_eq!(push.count(), 1);
        assert_eq!(store.documents(collections::NOTIFICATIONS).len(), 1);
        assert_eq!(
            store.recording("mech-1").expect("recording")["isNotified"],
            json!(true)
        );
    }

    #[test]
    fn audit_failure_leaves_flag_unset_and_retries() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_recording(&store, 3600);
        store.fail_creates(collections::NOTIFICATIONS, true);
        let mut reconciler = live_reconciler(&store, &push);

        let report = reconciler.tick_at(now());
        assert_eq!(report.failed, 1);
        assert_eq!(
            store.recording("mech-1").expect("recording")["isNotified"],
            json!(false)
        );

        store.fail_creates(collections::NOTIFICATIONS, false);
        let report = reconciler.tick_at(now());
        assert_eq!(report.notified, 1);
        assert_eq!(store.documents(collections::NOTIFICATIONS).len(), 1);
    }

    #[test]
    fn placeholder_device_records_without_push() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_recording(&store, 3600);
        store.insert_recording(
            "mech-1",
            json!({
                "taskId": "task-1",
                "deviceId": "device_mech-1_notification",
                "duration": 3600,
                "status": "running"
            }),
        );
        let mut reconciler = live_reconciler(&store, &push);

        let report = reconciler.tick_at(now());

        assert_eq!(report.notified, 1);
        assert_eq!(report.delivery_failed, 0);
        assert_eq!(push.count(), 0);
        assert_eq!(store.documents(collections::NOTIFICATIONS).len(), 1);
    }

    #[test]
    fn missing_task_document_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        store.insert_recording(
            "mech-1",
            json!({"taskId": "ghost", "duration": 99999, "status": "running"}),
        );
        let mut reconciler = live_reconciler(&store, &push);

        let report = reconciler.tick_at(now());

        assert_eq!(report.skipped, 1);
        assert_eq!(push.count(), 0);
    }

    #[test]
    fn zero_estimate_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_recording(&store, 3600);
        store.insert_document(collections::TASKS, "task-1", json!({"estimatedTime": 0}));
        let mut reconciler = live_reconciler(&store, &push);

        let report = reconciler.tick_at(now());

        assert_eq!(report.skipped, 1);
        assert!(store.documents(collections::NOTIFICATIONS).is_empty());
    }

    #[test]
    fn task_path_boundary_and_flag() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_task_path(&store, 5399);
        let mut reconciler = task_reconciler(&store, &push);
        assert_eq!(reconciler.source_kind(), SourceKind::TaskDocuments);
        assert_eq!(reconciler.name(), "threshold-task_documents");

        let report = reconciler.tick_at(now());
        assert_eq!(report.below_threshold, 1);

        seed_task_path(&store, 5400);
        let report = reconciler.tick_at(now());
        assert_eq!(report.notified, 1);

        let sent = push.sent.lock().expect("lock").clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, "token-ada");
        assert_eq!(sent[0].data["type"], "task_time_exceeded");
        assert_eq!(sent[0].data["actualTime"], "5400");
        assert_eq!(sent[0].data["actualTimeHours"], "1.5");
        assert_eq!(sent[0].data["timestamp"], now().timestamp().to_string());
        let task = store.document(collections::TASKS, "task-9").expect("task");
        assert_eq!(task[fields::IS_NOTIFIED], json!(true));
        assert_eq!(task[fields::NOTIFIED_AT], json!(now().to_rfc3339()));
        assert_eq!(task["title"], "Oil change");

        let report = reconciler.tick_at(now());
        assert_eq!(report.candidates, 0);
        assert_eq!(store.documents(collections::NOTIFICATIONS).len(), 1);
    }

    #[test]
    fn task_path_falls_back_to_live_recording_address() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_task_path(&store, 6000);
        store.insert_document(collections::MECHANICS, "mech-2", json!({"name": "Ada"}));
        store.insert_recording(
            "mech-2",
            json!({"taskId": "task-9", "deviceId": "live-token", "status": "running"}),
        );
        let mut reconciler = task_reconciler(&store, &push);

        reconciler.tick_at(now());

        let sent = push.sent.lock().expect("lock").clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, "live-token");
    }

    #[test]
    fn task_path_ignores_recording_for_other_task() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_task_path(&store, 6000);
        store.insert_document(collections::MECHANICS, "mech-2", json!({"name": "Ada"}));
        store.insert_recording(
            "mech-2",
            json!({"taskId": "task-other", "deviceId": "live-token", "status": "running"}),
        );
        let mut reconciler = task_reconciler(&store, &push);

        let report = reconciler.tick_at(now());

        assert_eq!(report.notified, 1);
        assert_eq!(push.count(), 0);
    }

    #[test]
    fn task_without_job_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        store.insert_document(
            collections::TASKS,
            "task-9",
            json!({"estimatedTime": 1, "status": "inProgress", "actualTime": 4000}),
        );
        let mut reconciler = task_reconciler(&store, &push);

        let report = reconciler.tick_at(now());

        assert_eq!(report.skipped, 1);
        assert!(store.documents(collections::NOTIFICATIONS).is_empty());
    }

    #[test]
    fn task_flag_does_not_touch_live_flag() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_task_path(&store, 6000);
        store.insert_recording(
            "mech-2",
            json!({"taskId": "task-9", "deviceId": "live-token", "duration": 10, "status": "running"}),
        );
        let mut reconciler = task_reconciler(&store, &push);

        reconciler.tick_at(now());

        assert_eq!(
            store.recording("mech-2").expect("recording")["isNotified"],
            Value::Null
        );
        assert!(store.field_writes().is_empty());
    }

    #[test]
    fn flag_write_failure_counts_as_failed() {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(CountingPush::default());
        seed_task_path(&store, 6000);
        store.fail_updates(collections::TASKS, true);
        let mut reconciler = task_reconciler(&store, &push);

        let report = reconciler.tick_at(now());

        assert_eq!(report.failed, 1);
        assert_eq!(store.documents(collections::NOTIFICATIONS).len(), 1);
    }
}
