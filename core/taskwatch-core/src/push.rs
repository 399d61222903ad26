//! Push delivery: the external push service and delivery-address policy.
//!
//! Delivery is fire-and-forget from the engine's point of view. A failed send
//! is logged by the pipeline and never prevents the audit record.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::PushConfig;
use crate::error::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

pub trait PushService: Send + Sync {
    /// Returns the service's delivery id.
    fn send(&self, message: &PushMessage) -> Result<String, DeliveryError>;
}

/// Decides whether an address is a real push token.
pub trait DeliveryAddressPolicy: Send + Sync {
    fn is_valid_delivery_address(&self, address: &str) -> bool;
}

/// Rejects empty addresses and synthetic `<prefix><id><suffix>` placeholders
/// that clients write when no push token has been registered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderAddressPolicy {
    prefix: String,
    suffix: String,
}

impl PlaceholderAddressPolicy {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &PushConfig) -> Self {
        Self::new(&config.placeholder_prefix, &config.placeholder_suffix)
    }
}

impl Default for PlaceholderAddressPolicy {
    fn default() -> Self {
        Self::new("device_", "_notification")
    }
}

impl DeliveryAddressPolicy for PlaceholderAddressPolicy {
    fn is_valid_delivery_address(&self, address: &str) -> bool {
        let address = address.trim();
        if address.is_empty() {
            return false;
        }
        if self.prefix.is_empty() && self.suffix.is_empty() {
            return true;
        }
        !(address.starts_with(&self.prefix) && address.ends_with(&self.suffix))
    }
}

/// Used when no push endpoint is configured; every send reports `NotConfigured`.
#[derive(Debug, Clone, Default)]
pub struct DisabledPushService;

impl PushService for DisabledPushService {
    fn send(&self, _message: &PushMessage) -> Result<String, DeliveryError> {
        Err(DeliveryError::NotConfigured)
    }
}

/// Posts FCM v1 shaped messages to an HTTP endpoint.
pub struct HttpPushService {
    agent: ureq::Agent,
    endpoint: String,
    token: String,
}

impl HttpPushService {
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self, String> {
        if endpoint.trim().is_empty() {
            return Err("push endpoint must not be empty".to_string());
        }
        if timeout.is_zero() {
            return Err("push timeout must be > 0".to_string());
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(concat!("taskwatch/", env!("CARGO_PKG_VERSION")))
            .build();
        Ok(Self {
            agent,
            endpoint: endpoint.trim().to_string(),
            token: token.to_string(),
        })
    }

    /// Builds the service from config, reading the bearer token from the
    /// configured environment variable.
    pub fn from_config(config: &PushConfig) -> Result<Self, String> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| "push endpoint is not configured".to_string())?;
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                format!(
                    "push endpoint configured but {} is not set",
                    config.token_env
                )
            })?;
        Self::new(endpoint, &token, Duration::from_millis(config.timeout_ms))
    }
}

impl PushService for HttpPushService {
    fn send(&self, message: &PushMessage) -> Result<String, DeliveryError> {
        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/json")
            .send_json(message_payload(message))
            .map_err(delivery_error_from_ureq)?;

        let body: Value = response
            .into_json()
            .map_err(|err| DeliveryError::Transient(format!("unreadable response: {}", err)))?;
        Ok(body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }
}

fn message_payload(message: &PushMessage) -> Value {
    json!({
        "message": {
            "token": message.token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
        }
    })
}

fn delivery_error_from_ureq(err: ureq::Error) -> DeliveryError {
    match err {
        ureq::Error::Status(status, response) => {
            let detail = response
                .into_string()
                .unwrap_or_default()
                .chars()
                .take(256)
                .collect::<String>();
            delivery_error_from_status(status, detail)
        }
        ureq::Error::Transport(transport) => DeliveryError::Transient(transport.to_string()),
    }
}

fn delivery_error_from_status(status: u16, detail: String) -> DeliveryError {
    match status {
        400 | 404 => DeliveryError::InvalidRecipient(detail),
        429 => DeliveryError::QuotaExceeded,
        500..=599 => DeliveryError::Transient(format!("status {}: {}", status, detail)),
        _ => DeliveryError::Rejected { status, detail },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_addresses_are_rejected() {
        let policy = PlaceholderAddressPolicy::default();
        assert!(!policy.is_valid_delivery_address("device_mech-1_notification"));
        assert!(!policy.is_valid_delivery_address(""));
        assert!(!policy.is_valid_delivery_address("   "));
        assert!(policy.is_valid_delivery_address("dGhpcyBpcyBhIHRva2Vu:APA91b"));
        // Prefix alone is not the placeholder pattern.
        assert!(policy.is_valid_delivery_address("device_abc123"));
    }

    #[test]
    fn empty_pattern_only_rejects_blank() {
        let policy = PlaceholderAddressPolicy::new("", "");
        assert!(policy.is_valid_delivery_address("device_x_notification"));
        assert!(!policy.is_valid_delivery_address(""));
    }

    #[test]
    fn disabled_service_reports_not_configured() {
        let message = PushMessage {
            token: "token".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
            data: BTreeMap::new(),
        };
        assert_eq!(
            DisabledPushService.send(&message),
            Err(DeliveryError::NotConfigured)
        );
    }

    #[test]
    fn payload_has_fcm_shape() {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), "task_time_exceeded".to_string());
        let message = PushMessage {
            token: "tok".to_string(),
            title: "Title".to_string(),
            body: "Body".to_string(),
            data,
        };
        let payload = message_payload(&message);
        assert_eq!(payload["message"]["token"], "tok");
        assert_eq!(payload["message"]["notification"]["title"], "Title");
        assert_eq!(payload["message"]["data"]["type"], "task_time_exceeded");
    }

    #[test]
    fn status_codes_map_to_delivery_errors() {
        assert!(matches!(
            delivery_error_from_status(404, String::new()),
            DeliveryError::InvalidRecipient(_)
        ));
        assert_eq!(
            delivery_error_from_status(429, String::new()),
            DeliveryError::QuotaExceeded
        );
        assert!(matches!(
            delivery_error_from_status(503, String::new()),
            DeliveryError::Transient(_)
        ));
        assert!(matches!(
            delivery_error_from_status(401, String::new()),
            DeliveryError::Rejected { status: 401, .. }
        ));
    }

    #[test]
    fn http_service_requires_endpoint_and_timeout() {
        assert!(HttpPushService::new("", "tok", Duration::from_secs(1)).is_err());
        assert!(HttpPushService::new("http://127.0.0.1:9/send", "tok", Duration::ZERO).is_err());
        assert!(HttpPushService::new("http://127.0.0.1:9/send", "tok", Duration::from_secs(1)).is_ok());
    }
}
