//! Storage trait definitions for contentgate
//!
//! These traits define the persistence seams of the pipeline core:
//! - `AuditStore`: append-only, sequence-numbered audit log
//! - `UnitStore`: snapshots of content units (active and archived)
//! - `PublishLedger`: history of outbound publish attempts
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// The all-zero digest used as the predecessor of the first audit event.
    pub fn genesis() -> Self {
        ContentDigest("0".repeat(64))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AuditStore: append-only event log
// ---------------------------------------------------------------------------

/// One stored audit event.
///
/// `event_hash` is computed by the writer; the store never recomputes or
/// rewrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// 1-indexed position in the log
    pub seq: u64,
    pub event_id: String,
    pub actor: String,
    pub action: String,
    pub input_hash: Option<ContentDigest>,
    pub output_hash: Option<ContentDigest>,
    /// Verdict or outcome recorded by the event, if any
    pub decision: Option<String>,
    pub reason: String,
    /// Pipeline session (content unit id, or "system")
    pub session_id: String,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: ContentDigest,
    pub event_hash: ContentDigest,
}

/// Append-only audit log.
///
/// Guarantees:
/// - `append` accepts only `seq == len + 1`; anything else is a
///   `SequenceConflict` and nothing is written.
/// - There is no update or delete operation.
/// - `range` and `by_session` return records ordered by `seq`.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append the next record. Fails only when the store is unavailable or
    /// the sequence number is not the next one.
    async fn append(&self, record: AuditRecord) -> StorageResult<()>;

    /// Most recent record, `None` for an empty log.
    async fn head(&self) -> StorageResult<Option<AuditRecord>>;

    /// Records with `from <= seq <= to`.
    async fn range(&self, from: u64, to: u64) -> StorageResult<Vec<AuditRecord>>;

    /// All records for one session.
    async fn by_session(&self, session_id: &str) -> StorageResult<Vec<AuditRecord>>;
}

// ---------------------------------------------------------------------------
// UnitStore: content unit snapshots
// ---------------------------------------------------------------------------

/// Serialized view of a content unit at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub unit_id: String,
    pub tenant_id: String,
    /// Lifecycle state name (e.g. "rights_checked", "archived")
    pub state: String,
    pub terminal_reason: Option<String>,
    /// Full unit document
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Content unit snapshot store.
///
/// Guarantees:
/// - `save` overwrites the previous snapshot for the same `unit_id`.
/// - `load` returns `StorageError::NotFound` for unknown units.
#[async_trait]
pub trait UnitStore: Send + Sync {
    async fn save(&self, snapshot: UnitSnapshot) -> StorageResult<()>;

    async fn load(&self, unit_id: &str) -> StorageResult<UnitSnapshot>;

    /// Snapshots for one tenant, oldest update first.
    async fn list_by_tenant(&self, tenant_id: &str) -> StorageResult<Vec<UnitSnapshot>>;
}

// ---------------------------------------------------------------------------
// PublishLedger: outbound attempt history
// ---------------------------------------------------------------------------

/// Outcome of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Published,
    Queued,
    Rejected,
    RateLimited,
    AuthFailed,
}

impl std::fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PublishOutcome::Published => "published",
            PublishOutcome::Queued => "queued",
            PublishOutcome::Rejected => "rejected",
            PublishOutcome::RateLimited => "rate_limited",
            PublishOutcome::AuthFailed => "auth_failed",
        };
        f.write_str(s)
    }
}

/// Ledger row for a publish attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub destination: String,
    pub content_hash: ContentDigest,
    pub outcome: PublishOutcome,
    pub external_id: Option<String>,
    pub unit_id: String,
    pub reason: String,
    pub retry_after: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

/// Publish attempt ledger.
///
/// Guarantees:
/// - Records are append-only and returned in insertion order.
/// - `published_hashes` lists exactly the `(destination, hash)` pairs with
///   a `Published` outcome.
#[async_trait]
pub trait PublishLedger: Send + Sync {
    async fn record(&self, record: PublishRecord) -> StorageResult<()>;

    async fn history(&self, destination: &str) -> StorageResult<Vec<PublishRecord>>;

    async fn published_hashes(&self) -> StorageResult<Vec<(String, ContentDigest)>>;
}
