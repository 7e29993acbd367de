//! Publish collaborator: one implementation per destination.
//!
//! Destinations differ in what they can do, not in how they are called, so
//! the seam is a single trait plus a capability set instead of a hierarchy.

use async_trait::async_trait;

use crate::domain::ContentPackage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Publish,
    FetchStatus,
}

/// Typed publish failure, as reported by the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishErrorKind {
    /// Invalid or expired credentials. Never retried.
    Auth,
    /// Destination-side throttling, with its requested back-off if given.
    RateLimit { retry_after: Option<chrono::Duration> },
    /// Package refused as malformed.
    Validation,
    /// Package refused by the destination's content policy.
    Policy,
    /// Network or server error; worth retrying.
    Transient,
}

impl std::fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishErrorKind::Auth => f.write_str("AUTH"),
            PublishErrorKind::RateLimit { .. } => f.write_str("RATE_LIMIT"),
            PublishErrorKind::Validation => f.write_str("VALIDATION"),
            PublishErrorKind::Policy => f.write_str("POLICY"),
            PublishErrorKind::Transient => f.write_str("TRANSIENT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PublishError {
    pub kind: PublishErrorKind,
    pub message: String,
}

impl PublishError {
    pub fn new(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Auth, message)
    }

    pub fn rate_limit(retry_after: Option<chrono::Duration>, message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::RateLimit { retry_after }, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Validation, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Policy, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Transient, message)
    }
}

/// Where a published post stands on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Processing,
    Live,
    Removed { reason: String },
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Destination key, e.g. "tiktok".
    fn destination(&self) -> &str;

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Publish]
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Publish a package and return the destination's id for it.
    async fn publish(&self, package: &ContentPackage) -> Result<String, PublishError>;

    async fn fetch_status(&self, _external_id: &str) -> Result<RemoteStatus, PublishError> {
        Err(PublishError::validation(format!(
            "{} does not report post status",
            self.destination()
        )))
    }
}
