//! Liveness inference for running recordings.
//!
//! The mobile client pushes its recording duration every second while it is
//! in the foreground. When the OS suspends it, the duration stops moving. We
//! detect that purely from observed deltas: an unchanged duration for at least
//! `silence_threshold` marks the recording silent, and from the following tick
//! on we advance the duration ourselves, one second per tick, until the client
//! writes again or the recording disappears.
//!
//! ## Per-recording state machine
//!
//! ```text
//! (absent)            → tracked          first observation, no action
//! tracked/silent      → tracked          duration changed externally
//! tracked             → silent           unchanged for >= threshold, no write
//! silent              → silent           unchanged: write duration + 1
//! any                 → tracked (reseed) duration decreased or task changed
//! any                 → (absent)         key gone from the live store
//! ```
//!
//! Tracking state is owned by the caller (`TrackingTable`) and never shared
//! between reconcilers.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use taskwatch_protocol::{RecordingField, RecordingSnapshot};

use crate::config::LivenessConfig;
use crate::scheduler::PeriodicTask;
use crate::store::LiveStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingEntry {
    pub task_id: String,
    pub last_observed_duration: i64,
    pub last_observed_at: DateTime<Utc>,
    pub inferred_silent: bool,
    pub device_id: String,
    pub is_notified: bool,
}

impl TrackingEntry {
    fn seed(snapshot: &RecordingSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            task_id: snapshot.task_id.clone(),
            last_observed_duration: snapshot.duration,
            last_observed_at: now,
            inferred_silent: false,
            device_id: snapshot.device_id.clone(),
            is_notified: snapshot.is_notified,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackingTable {
    entries: HashMap<String, TrackingEntry>,
}

impl TrackingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&TrackingEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: TrackingEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn silent_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.inferred_silent)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessSignal {
    NewRecording {
        key: String,
        task_id: String,
        duration: i64,
    },
    /// Duration went backwards or the task changed under the same key.
    NewGeneration {
        key: String,
        task_id: String,
        previous_duration: i64,
        duration: i64,
    },
    Resumed {
        key: String,
        task_id: String,
        duration: i64,
    },
    SilenceDetected {
        key: String,
        task_id: String,
        silent_for_secs: i64,
    },
    Synthesized {
        key: String,
        task_id: String,
        duration: i64,
    },
    Ended {
        key: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub signals: Vec<LivenessSignal>,
    pub running: usize,
    pub malformed: usize,
    pub write_failures: usize,
    pub fetch_failed: bool,
}

impl LivenessReport {
    pub fn synthesized(&self) -> usize {
        self.signals
            .iter()
            .filter(|signal| matches!(signal, LivenessSignal::Synthesized { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivenessStats {
    pub tracked: usize,
    pub silent: usize,
}

/// Runs one liveness pass over the live store.
pub fn reconcile_liveness(
    table: &mut TrackingTable,
    store: &dyn LiveStore,
    config: &LivenessConfig,
    now: DateTime<Utc>,
) -> LivenessReport {
    let mut report = LivenessReport::default();

    let recordings = match store.get_all() {
        Ok(recordings) => recordings,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to fetch live recordings");
            report.fetch_failed = true;
            return report;
        }
    };

    for (key, value) in &recordings {
        let Some(snapshot) = RecordingSnapshot::from_value(value) else {
            tracing::warn!(key = %key, "Skipping malformed recording entry");
            report.malformed += 1;
            continue;
        };
        if !snapshot.is_running() {
            continue;
        }
        report.running += 1;
        observe_recording(table, store, config, key, &snapshot, now, &mut report);
    }

    let mut ended: Vec<String> = table
        .entries
        .keys()
        .filter(|key| !recordings.contains_key(*key))
        .cloned()
        .collect();
    ended.sort();
    for key in ended {
        table.entries.remove(&key);
        tracing::info!(key = %key, "Recording removed from live store");
        report.signals.push(LivenessSignal::Ended { key });
    }

    report
}

fn observe_recording(
    table: &mut TrackingTable,
    store: &dyn LiveStore,
    config: &LivenessConfig,
    key: &str,
    snapshot: &RecordingSnapshot,
    now: DateTime<Utc>,
    report: &mut LivenessReport,
) {
    let Some(entry) = table.entries.get_mut(key) else {
        tracing::info!(
            key = %key,
            task_id = %snapshot.task_id,
            duration = snapshot.duration,
            "New recording detected"
        );
        table
            .entries
            .insert(key.to_string(), TrackingEntry::seed(snapshot, now));
        report.signals.push(LivenessSignal::NewRecording {
            key: key.to_string(),
            task_id: snapshot.task_id.clone(),
            duration: snapshot.duration,
        });
        return;
    };

    entry.device_id.clone_from(&snapshot.device_id);
    entry.is_notified = snapshot.is_notified;

    if snapshot.duration < entry.last_observed_duration || snapshot.task_id != entry.task_id {
        let previous_duration = entry.last_observed_duration;
        tracing::info!(
            key = %key,
            task_id = %snapshot.task_id,
            previous_task_id = %entry.task_id,
            previous_duration,
            duration = snapshot.duration,
            "Recording restarted; tracking new generation"
        );
        *entry = TrackingEntry::seed(snapshot, now);
        report.signals.push(LivenessSignal::NewGeneration {
            key: key.to_string(),
            task_id: snapshot.task_id.clone(),
            previous_duration,
            duration: snapshot.duration,
        });
        return;
    }

    if snapshot.duration != entry.last_observed_duration {
        entry.last_observed_duration = snapshot.duration;
        entry.last_observed_at = now;
        if entry.inferred_silent {
            entry.inferred_silent = false;
            tracing::info!(
                key = %key,
                task_id = %entry.task_id,
                duration = snapshot.duration,
                "Client resumed recording"
            );
            report.signals.push(LivenessSignal::Resumed {
                key: key.to_string(),
                task_id: entry.task_id.clone(),
                duration: snapshot.duration,
            });
        }
        return;
    }

    if !entry.inferred_silent {
        let silent_for = now.signed_duration_since(entry.last_observed_at);
        if silent_for >= config.silence_threshold() {
            entry.inferred_silent = true;
            tracing::info!(
                key = %key,
                task_id = %entry.task_id,
                silent_for_secs = silent_for.num_seconds(),
                "Client went silent; continuing recording in background"
            );
            report.signals.push(LivenessSignal::SilenceDetected {
                key: key.to_string(),
                task_id: entry.task_id.clone(),
                silent_for_secs: silent_for.num_seconds(),
            });
        }
        // Synthesis starts on the next tick.
        return;
    }

    let next_duration = snapshot.duration.saturating_add(1);
    match store.set_field(key, RecordingField::Duration, Value::from(next_duration)) {
        Ok(()) => {
            entry.last_observed_duration = next_duration;
            entry.last_observed_at = now;
            let every = i64::try_from(config.progress_log_every_secs).unwrap_or(0);
            if every > 0 && next_duration % every == 0 {
                tracing::info!(
                    key = %key,
                    task_id = %entry.task_id,
                    duration = next_duration,
                    "Background recording progress"
                );
            }
            report.signals.push(LivenessSignal::Synthesized {
                key: key.to_string(),
                task_id: entry.task_id.clone(),
                duration: next_duration,
            });
        }
        Err(err) => {
            // Entry untouched: the next tick retries the same increment.
            tracing::warn!(
                key = %key,
                task_id = %entry.task_id,
                error = %err,
                "Failed to write synthesized duration"
            );
            report.write_failures += 1;
        }
    }
}

/// Periodic driver owning one tracking table.
pub struct LivenessReconciler {
    store: Arc<dyn LiveStore>,
    config: LivenessConfig,
    table: TrackingTable,
}

impl LivenessReconciler {
    pub fn new(store: Arc<dyn LiveStore>, config: LivenessConfig) -> Self {
        Self {
            store,
            config,
            table: TrackingTable::new(),
        }
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) -> LivenessReport {
        reconcile_liveness(&mut self.table, self.store.as_ref(), &self.config, now)
    }

    pub fn stats(&self) -> LivenessStats {
        LivenessStats {
            tracked: self.table.len(),
            silent: self.table.silent_count(),
        }
    }
}

impl PeriodicTask for LivenessReconciler {
    fn name(&self) -> String {
        "liveness".to_string()
    }

    fn run_tick(&mut self) {
        let report = self.tick_at(Utc::now());
        tracing::debug!(
            running = report.running,
            synthesized = report.synthesized(),
            write_failures = report.write_failures,
            tracked = self.table.len(),
            silent = self.table.silent_count(),
            "Liveness tick complete"
        );
    }
}
