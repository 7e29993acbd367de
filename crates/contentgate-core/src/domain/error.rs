//! Error taxonomy for the pipeline core.

use chrono::{DateTime, Utc};
use contentgate_state::StorageError;

use crate::audit::AuditEventId;

/// Pipeline errors.
///
/// The first five variants are the failure classes callers are expected to
/// branch on; the rest are structural (bad input, missing unit, I/O).
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Deterministic REJECT. Never retried; the unit is archived.
    #[error("policy rejection: {reason} (audit event {audit_event})")]
    PolicyRejection {
        reason: String,
        audit_event: AuditEventId,
    },

    /// Network or server failure that survived every retry.
    #[error("transient failure publishing to {destination} after {attempts} attempts: {message}")]
    TransientFailure {
        destination: String,
        attempts: u32,
        message: String,
    },

    /// Credentials rejected. The destination stays locked until reset.
    #[error("authentication failed for {destination}: {message}")]
    AuthFailure {
        destination: String,
        message: String,
    },

    #[error("rate limited on {destination}, retry after {retry_after}")]
    RateLimited {
        destination: String,
        retry_after: DateTime<Utc>,
    },

    /// Audit verification mismatch. Fatal: the pipeline halts.
    #[error("audit chain integrity failure at seq {at}: {detail}")]
    ChainIntegrityFailure { at: u64, detail: String },

    #[error("pipeline halted: {0}")]
    Halted(String),

    #[error("invalid transition for unit {unit_id}: {detail}")]
    InvalidTransition { unit_id: String, detail: String },

    #[error("publish not permitted for unit {unit_id}: {detail}")]
    PublishNotPermitted { unit_id: String, detail: String },

    #[error("stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("invalid audit range {from}..={to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("unit not found: {0}")]
    UnitNotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("value cannot be canonicalized: {0}")]
    NonCanonical(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Short machine-readable class name, used as the audit decision for
    /// failure events.
    pub fn class(&self) -> &'static str {
        match self {
            GateError::PolicyRejection { .. } => "policy_rejection",
            GateError::TransientFailure { .. } => "transient_failure",
            GateError::AuthFailure { .. } => "auth_failure",
            GateError::RateLimited { .. } => "rate_limited",
            GateError::ChainIntegrityFailure { .. } => "chain_integrity_failure",
            GateError::Halted(_) => "halted",
            GateError::InvalidTransition { .. } => "invalid_transition",
            GateError::PublishNotPermitted { .. } => "publish_not_permitted",
            GateError::StageFailed { .. } => "stage_failed",
            GateError::InvalidRange { .. } => "invalid_range",
            GateError::UnitNotFound(_) => "unit_not_found",
            GateError::Unauthorized(_) => "unauthorized",
            GateError::InvalidConfig(_) => "invalid_config",
            GateError::NonCanonical(_) => "non_canonical",
            GateError::DigestMismatch { .. } => "digest_mismatch",
            GateError::Storage(_) => "storage",
            GateError::Serialization(_) => "serialization",
            GateError::ConfigParse(_) => "config_parse",
            GateError::Io(_) => "io",
        }
    }

    /// Whether a caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::TransientFailure { .. }
                | GateError::RateLimited { .. }
                | GateError::StageFailed { .. }
                | GateError::Storage(StorageError::Unavailable(_))
        )
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_rejection_carries_reason_and_event() {
        let err = GateError::PolicyRejection {
            reason: "license expired".to_string(),
            audit_event: AuditEventId(42),
        };
        let msg = err.to_string();
        assert!(msg.contains("license expired"));
        assert!(msg.contains("42"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_is_retryable() {
        let err = GateError::TransientFailure {
            destination: "tiktok".to_string(),
            attempts: 3,
            message: "502".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.class(), "transient_failure");
    }

    #[test]
    fn test_storage_unavailable_is_retryable() {
        let err = GateError::from(StorageError::Unavailable("down".to_string()));
        assert!(err.is_retryable());
        let err = GateError::from(StorageError::Backend("bad row".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_auth_failure_is_not_retryable() {
        let err = GateError::AuthFailure {
            destination: "x".to_string(),
            message: "token expired".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("authentication failed for x"));
    }
}
