//! Notification pipeline: name lookup, message composition, push, audit record.
//!
//! The audit record is the source of truth for "a notification happened".
//! Push delivery is best effort; only a failed audit write fails the pipeline.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use taskwatch_protocol::{collections, Mechanic, NotificationKind, NotificationRecord};

use crate::error::{DeliveryError, MonitorError, Result};
use crate::push::{DeliveryAddressPolicy, PushMessage, PushService};
use crate::store::{generate_document_id, DocumentStore};

pub const FALLBACK_RECIPIENT_NAME: &str = "Mechanic";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub recipient_id: String,
    pub task_id: String,
    pub task_title: String,
    pub device_address: Option<String>,
    pub duration_secs: i64,
    pub estimated_secs: i64,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent(String),
    /// No usable address; push was not attempted.
    Suppressed,
    Failed(DeliveryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOutcome {
    pub record_id: String,
    pub message: ComposedMessage,
    pub delivery: DeliveryStatus,
}

impl NotificationOutcome {
    /// The push result as an error; the audit record exists either way.
    pub fn delivery_result(&self) -> Result<()> {
        match &self.delivery {
            DeliveryStatus::Failed(err) => Err(MonitorError::Delivery(err.clone())),
            DeliveryStatus::Sent(_) | DeliveryStatus::Suppressed => Ok(()),
        }
    }
}

pub struct NotificationPipeline {
    documents: Arc<dyn DocumentStore>,
    push: Arc<dyn PushService>,
    policy: Arc<dyn DeliveryAddressPolicy>,
}

impl NotificationPipeline {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        push: Arc<dyn PushService>,
        policy: Arc<dyn DeliveryAddressPolicy>,
    ) -> Self {
        Self {
            documents,
            push,
            policy,
        }
    }

    /// Composes, pushes and records one notification stamped at `now`.
    pub fn notify(
        &self,
        request: &NotificationRequest,
        now: DateTime<Utc>,
    ) -> Result<NotificationOutcome> {
        let name = self.recipient_name(&request.recipient_id);
        let message = compose(request, &name, now);

        let delivery = match request
            .device_address
            .as_deref()
            .filter(|address| self.policy.is_valid_delivery_address(address))
        {
            Some(address) => self.deliver(request, address, &message),
            None => {
                tracing::info!(
                    mechanic_id = %request.recipient_id,
                    task_id = %request.task_id,
                    "No valid push address; recording notification only"
                );
                DeliveryStatus::Suppressed
            }
        };

        let record = NotificationRecord {
            id: generate_document_id(),
            mechanic_id: request.recipient_id.clone(),
            title: message.title.clone(),
            message: message.body.clone(),
            kind: request.kind,
            task_id: request.task_id.clone(),
            created: now,
            read: false,
        };
        self.documents
            .create_document(collections::NOTIFICATIONS, &record.id, record.to_document())
            .map_err(|source| MonitorError::AuditWriteFailure {
                id: record.id.clone(),
                source,
            })?;

        tracing::info!(
            record_id = %record.id,
            mechanic_id = %request.recipient_id,
            task_id = %request.task_id,
            kind = request.kind.as_str(),
            "Notification recorded"
        );

        Ok(NotificationOutcome {
            record_id: record.id,
            message,
            delivery,
        })
    }

    fn recipient_name(&self, recipient_id: &str) -> String {
        match self
            .documents
            .get_document(collections::MECHANICS, recipient_id)
        {
            Ok(Some(document)) => Mechanic::from_document(&document)
                .name
                .unwrap_or_else(|| FALLBACK_RECIPIENT_NAME.to_string()),
            Ok(None) => FALLBACK_RECIPIENT_NAME.to_string(),
            Err(err) => {
                tracing::warn!(
                    mechanic_id = %recipient_id,
                    error = %err,
                    "Failed to look up mechanic name"
                );
                FALLBACK_RECIPIENT_NAME.to_string()
            }
        }
    }

    fn deliver(
        &self,
        request: &NotificationRequest,
        address: &str,
        message: &ComposedMessage,
    ) -> DeliveryStatus {
        let push = PushMessage {
            token: address.to_string(),
            title: message.title.clone(),
            body: message.body.clone(),
            data: message.data.clone(),
        };
        match self.push.send(&push) {
            Ok(delivery_id) => {
                tracing::info!(
                    mechanic_id = %request.recipient_id,
                    task_id = %request.task_id,
                    delivery_id = %delivery_id,
                    "Push notification sent"
                );
                DeliveryStatus::Sent(delivery_id)
            }
            Err(err) => {
                tracing::warn!(
                    mechanic_id = %request.recipient_id,
                    task_id = %request.task_id,
                    error = %err,
                    "Push delivery failed"
                );
                DeliveryStatus::Failed(err)
            }
        }
    }
}

pub fn compose(request: &NotificationRequest, name: &str, now: DateTime<Utc>) -> ComposedMessage {
    let estimated_hours = format_hours(request.estimated_secs as f64 / 3600.0);
    let (title, body) = match request.kind {
        NotificationKind::EstimatedTimeReached => (
            "⏰ Estimated Time Reached".to_string(),
            format!(
                "Hi {}! '{}' has reached its estimated time of {} hours. Current time: {} minutes.",
                name,
                request.task_title,
                estimated_hours,
                request.duration_secs / 60
            ),
        ),
        NotificationKind::TaskTimeExceeded => (
            "⏰ Task Time Exceeded".to_string(),
            format!(
                "'{}' has exceeded its estimated time of {}h (current: {:.1}h).",
                request.task_title,
                estimated_hours,
                request.duration_secs as f64 / 3600.0
            ),
        ),
    };

    let mut data = BTreeMap::new();
    data.insert("type".to_string(), request.kind.as_str().to_string());
    data.insert("taskId".to_string(), request.task_id.clone());
    data.insert("mechanicId".to_string(), request.recipient_id.clone());
    data.insert("mechanicName".to_string(), name.to_string());
    data.insert("taskTitle".to_string(), request.task_title.clone());
    data.insert("estimatedTime".to_string(), estimated_hours);
    data.insert(
        "currentDuration".to_string(),
        request.duration_secs.to_string(),
    );
    if request.kind == NotificationKind::TaskTimeExceeded {
        data.insert("actualTime".to_string(), request.duration_secs.to_string());
        data.insert(
            "actualTimeHours".to_string(),
            format!("{:.1}", request.duration_secs as f64 / 3600.0),
        );
    }
    data.insert("timestamp".to_string(), now.timestamp().to_string());

    ComposedMessage { title, body, data }
}

/// Whole hours print without a decimal point; anything else keeps at most two
/// decimals with trailing zeros dropped.
pub fn format_hours(hours: f64) -> String {
    if !hours.is_finite() {
        return "0".to_string();
    }
    if hours.fract() == 0.0 {
        return format!("{}", hours as i64);
    }
    let rendered = format!("{:.2}", hours);
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
