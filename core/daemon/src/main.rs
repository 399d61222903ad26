//! taskwatch daemon entrypoint.
//!
//! Runs the liveness reconciler and one threshold reconciler per configured
//! candidate source, each on its own periodic thread, against the local
//! SQLite store. Exits cleanly on SIGINT/SIGTERM once in-flight ticks finish.

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use taskwatch_core::config::{PushConfig, SourceKind};
use taskwatch_core::threshold::CandidateSource;
use taskwatch_core::{
    load_config, spawn_periodic, DisabledPushService, HttpPushService, LiveRecordingCandidates,
    LivenessReconciler, NotificationPipeline, PeriodicHandle, PlaceholderAddressPolicy,
    PushService, SqliteStore, TaskDocumentCandidates, ThresholdReconciler,
};

mod shutdown;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() {
    init_logging();

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load taskwatch config");
            std::process::exit(1);
        }
    };

    let store_path = match config.store.resolve_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve store path");
            std::process::exit(1);
        }
    };

    let store = match SqliteStore::open(store_path.clone()) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, path = %store_path.display(), "Failed to open store");
            std::process::exit(1);
        }
    };

    let push = match build_push_service(&config.push) {
        Ok(push) => push,
        Err(err) => {
            error!(error = %err, "Failed to configure push delivery");
            std::process::exit(1);
        }
    };

    let shutdown_flag = match shutdown::install_handlers() {
        Ok(flag) => flag,
        Err(err) => {
            error!(error = %err, "Failed to install signal handlers");
            std::process::exit(1);
        }
    };

    let pipeline = Arc::new(NotificationPipeline::new(
        store.clone(),
        push,
        Arc::new(PlaceholderAddressPolicy::from_config(&config.push)),
    ));

    let mut handles: Vec<PeriodicHandle> = Vec::new();

    let liveness = LivenessReconciler::new(store.clone(), config.liveness.clone());
    match spawn_periodic(liveness, config.liveness.interval()) {
        Ok(handle) => handles.push(handle),
        Err(err) => {
            error!(error = %err, "Failed to spawn liveness reconciler");
            std::process::exit(1);
        }
    }

    for source in config.threshold.unique_sources() {
        let candidates: Box<dyn CandidateSource> = match source {
            SourceKind::LiveRecordings => {
                Box::new(LiveRecordingCandidates::new(store.clone(), store.clone()))
            }
            SourceKind::TaskDocuments => {
                Box::new(TaskDocumentCandidates::new(store.clone(), store.clone()))
            }
        };
        let reconciler = ThresholdReconciler::new(
            candidates,
            Arc::clone(&pipeline),
            config.threshold.unit_for(source),
        );
        match spawn_periodic(reconciler, config.threshold.interval()) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                error!(error = %err, source = source.as_str(), "Failed to spawn threshold reconciler");
                std::process::exit(1);
            }
        }
    }

    info!(
        store = %store_path.display(),
        liveness_interval_ms = config.liveness.interval_ms,
        silence_threshold_secs = config.liveness.silence_threshold_secs,
        threshold_interval_secs = config.threshold.interval_secs,
        reconcilers = handles.len(),
        push_enabled = config.push.endpoint.is_some(),
        "taskwatch daemon started"
    );

    while !shutdown_flag.requested() {
        thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }

    info!("Shutdown requested; stopping reconcilers");
    stop_all(handles, config.shutdown.timeout());
    info!("taskwatch daemon stopped");
}

fn build_push_service(config: &PushConfig) -> Result<Arc<dyn PushService>, String> {
    if config.endpoint.is_none() {
        warn!("No push endpoint configured; notifications will only be recorded");
        return Ok(Arc::new(DisabledPushService));
    }
    let service = HttpPushService::from_config(config)?;
    Ok(Arc::new(service))
}

/// Signals every reconciler first so none starts another tick, then waits on
/// them against a single shared deadline.
fn stop_all(mut handles: Vec<PeriodicHandle>, timeout: Duration) {
    for handle in &mut handles {
        handle.request_stop();
    }
    let deadline = Instant::now().checked_add(timeout);
    for handle in handles {
        let name = handle.name().to_string();
        let remaining = deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(timeout);
        if !handle.stop(remaining) {
            warn!(task = %name, "Reconciler still running at shutdown deadline");
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("TASKWATCH_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
