//! # taskwatch-core
//!
//! Engine for server-side recording continuity and estimate-overrun alerts.
//!
//! Mobile clients push a recording's elapsed `duration` into a live store
//! about once a second. When the OS suspends the client those writes stop;
//! the liveness reconciler notices the silence and keeps the duration moving.
//! Independently, threshold reconcilers notify the assigned mechanic exactly
//! once when observed time reaches the task's estimate.
//!
//! ## Design Principles
//!
//! - **Synchronous**: plain threads and blocking I/O, no async runtime.
//! - **Owned state**: each reconciler owns its tracking state; nothing is
//!   shared between reconcilers.
//! - **Audit before flag**: `isNotified` is only set after the notification
//!   record exists.
//! - **Pluggable edges**: stores and push delivery are traits; SQLite and
//!   HTTP adapters ship with the crate.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskwatch_core::{LivenessReconciler, MonitorConfig, SqliteStore, spawn_periodic};
//!
//! let config = MonitorConfig::default();
//! let store = Arc::new(SqliteStore::open(config.store.resolve_path()?)?);
//! let liveness = LivenessReconciler::new(store, config.liveness.clone());
//! let handle = spawn_periodic(liveness, config.liveness.interval())?;
//! ```

pub mod config;
pub mod error;
pub mod liveness;
pub mod notify;
pub mod push;
pub mod scheduler;
pub mod store;
pub mod threshold;

pub use config::{load_config, MonitorConfig, SourceKind};
pub use error::{DeliveryError, MonitorError, Result, StoreError};
pub use liveness::{LivenessReconciler, LivenessReport, LivenessSignal, LivenessStats};
pub use notify::{DeliveryStatus, NotificationOutcome, NotificationPipeline, NotificationRequest};
pub use push::{
    DeliveryAddressPolicy, DisabledPushService, HttpPushService, PlaceholderAddressPolicy,
    PushMessage, PushService,
};
pub use scheduler::{spawn_periodic, PeriodicHandle, PeriodicTask};
pub use store::{DocumentStore, LiveStore, QueryOp, SqliteStore, StoredDocument};
pub use threshold::{
    EstimateUnit, LiveRecordingCandidates, TaskDocumentCandidates, ThresholdReconciler,
    ThresholdReport,
};

#[cfg(any(test, feature = "test-helpers"))]
pub use store::MemoryStore;
