//! Error types for taskwatch-core.
//!
//! Per-item failures inside a reconciler tick are logged and skipped; only
//! `MonitorError::AuditWriteFailure` is allowed to abort a notification,
//! because without the audit record the at-most-once guarantee is gone.

// ═══════════════════════════════════════════════════════════════════════════════
// Store Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failures reported by a `LiveStore` or `DocumentStore` adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Delivery Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Push delivery failures. None of these block the audit record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("recipient address rejected: {0}")]
    InvalidRecipient(String),

    #[error("push quota exceeded")]
    QuotaExceeded,

    #[error("transient push failure: {0}")]
    Transient(String),

    #[error("push service rejected message (status {status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("push service not configured")]
    NotConfigured,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Transient; the candidate is retried on the next tick.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Missing task, job or recipient; the candidate is skipped.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("push delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("failed to write notification record {id}: {source}")]
    AuditWriteFailure {
        id: String,
        #[source]
        source: StoreError,
    },
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                MonitorError::NotFound(format!("{collection}/{id}"))
            }
            other => MonitorError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Convenience type alias for Results using MonitorError.
pub type Result<T> = std::result::Result<T, MonitorError>;
