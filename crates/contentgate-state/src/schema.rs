//! SurrealDB row types
//!
//! Rows mirror the `storage_traits` types but keep digests as plain strings
//! and carry the SurrealDB record id. Conversion happens at the store
//! boundary in `surreal_store`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{
    AuditRecord, ContentDigest, PublishOutcome, PublishRecord, StorageResult, UnitSnapshot,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

// Audit timestamps are hashed, so they are stored as fixed-precision text
// and must parse back to the identical instant.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp {s}: {e}")))
}

fn decode_digest_opt(s: Option<String>) -> StorageResult<Option<ContentDigest>> {
    s.map(ContentDigest::try_from).transpose()
}

/// Audit event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEventRow {
    /// SurrealDB record ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub seq: u64,
    pub event_id: String,
    pub actor: String,
    pub action: String,
    pub input_hash: Option<String>,
    pub output_hash: Option<String>,
    pub decision: Option<String>,
    pub reason: String,
    pub session_id: String,
    pub tags: Vec<String>,
    /// RFC 3339 with nanosecond precision
    pub timestamp: String,
    pub previous_hash: String,
    pub event_hash: String,
}

impl From<AuditRecord> for AuditEventRow {
    fn from(r: AuditRecord) -> Self {
        AuditEventRow {
            id: None,
            seq: r.seq,
            event_id: r.event_id,
            actor: r.actor,
            action: r.action,
            input_hash: r.input_hash.map(String::from),
            output_hash: r.output_hash.map(String::from),
            decision: r.decision,
            reason: r.reason,
            session_id: r.session_id,
            tags: r.tags,
            timestamp: encode_timestamp(&r.timestamp),
            previous_hash: r.previous_hash.into(),
            event_hash: r.event_hash.into(),
        }
    }
}

impl AuditEventRow {
    pub fn into_record(self) -> StorageResult<AuditRecord> {
        Ok(AuditRecord {
            seq: self.seq,
            event_id: self.event_id,
            actor: self.actor,
            action: self.action,
            input_hash: decode_digest_opt(self.input_hash)?,
            output_hash: decode_digest_opt(self.output_hash)?,
            decision: self.decision,
            reason: self.reason,
            session_id: self.session_id,
            tags: self.tags,
            timestamp: decode_timestamp(&self.timestamp)?,
            previous_hash: ContentDigest::try_from(self.previous_hash)?,
            event_hash: ContentDigest::try_from(self.event_hash)?,
        })
    }
}

/// Content unit snapshot row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub unit_id: String,
    pub tenant_id: String,
    pub state: String,
    pub terminal_reason: Option<String>,
    /// Unit document encoded as JSON text
    pub payload: String,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl UnitRow {
    pub fn from_snapshot(s: UnitSnapshot) -> StorageResult<Self> {
        Ok(UnitRow {
            id: None,
            unit_id: s.unit_id,
            tenant_id: s.tenant_id,
            state: s.state,
            terminal_reason: s.terminal_reason,
            payload: serde_json::to_string(&s.payload)?,
            updated_at: s.updated_at,
        })
    }

    pub fn into_snapshot(self) -> StorageResult<UnitSnapshot> {
        Ok(UnitSnapshot {
            unit_id: self.unit_id,
            tenant_id: self.tenant_id,
            state: self.state,
            terminal_reason: self.terminal_reason,
            payload: serde_json::from_str(&self.payload)?,
            updated_at: self.updated_at,
        })
    }
}

/// Publish attempt row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAttemptRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Insertion position, used to return history in order
    pub ordinal: u64,
    pub destination: String,
    pub content_hash: String,
    pub outcome: PublishOutcome,
    pub external_id: Option<String>,
    pub unit_id: String,
    pub reason: String,
    pub retry_after: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl PublishAttemptRow {
    pub fn new(ordinal: u64, r: PublishRecord) -> Self {
        PublishAttemptRow {
            id: None,
            ordinal,
            destination: r.destination,
            content_hash: r.content_hash.into(),
            outcome: r.outcome,
            external_id: r.external_id,
            unit_id: r.unit_id,
            reason: r.reason,
            retry_after: r.retry_after.as_ref().map(encode_timestamp),
            recorded_at: r.recorded_at,
        }
    }

    pub fn into_record(self) -> StorageResult<PublishRecord> {
        Ok(PublishRecord {
            destination: self.destination,
            content_hash: ContentDigest::try_from(self.content_hash)?,
            outcome: self.outcome,
            external_id: self.external_id,
            unit_id: self.unit_id,
            reason: self.reason,
            retry_after: self.retry_after.as_deref().map(decode_timestamp).transpose()?,
            recorded_at: self.recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> AuditRecord {
        AuditRecord {
            seq: 3,
            event_id: "evt-3".to_string(),
            actor: "rights_evaluator".to_string(),
            action: "rights_decision".to_string(),
            input_hash: Some(ContentDigest::from_bytes(b"in")),
            output_hash: None,
            decision: Some("APPROVE".to_string()),
            reason: "style reference is clean".to_string(),
            session_id: "unit-1".to_string(),
            tags: vec!["rights".to_string()],
            timestamp: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
            previous_hash: ContentDigest::genesis(),
            event_hash: ContentDigest::from_bytes(b"evt"),
        }
    }

    #[test]
    fn audit_row_preserves_nanosecond_timestamp() {
        let record = sample_record();
        let row = AuditEventRow::from(record.clone());
        assert!(row.timestamp.ends_with(".123456789Z"));
        assert_eq!(row.into_record().unwrap(), record);
    }

    #[test]
    fn audit_row_with_corrupt_digest_fails() {
        let mut row = AuditEventRow::from(sample_record());
        row.event_hash = "zz".to_string();
        assert!(matches!(
            row.into_record(),
            Err(StorageError::InvalidDigest { .. })
        ));
    }

    #[test]
    fn unit_row_payload_survives_text_encoding() {
        let snap = UnitSnapshot {
            unit_id: "u1".to_string(),
            tenant_id: "t1".to_string(),
            state: "archived".to_string(),
            terminal_reason: Some("rights rejected".to_string()),
            payload: serde_json::json!({"counters": {"rights": 2}}),
            updated_at: Utc::now(),
        };
        let back = UnitRow::from_snapshot(snap.clone())
            .unwrap()
            .into_snapshot()
            .unwrap();
        assert_eq!(back.payload, snap.payload);
        assert_eq!(back.terminal_reason, snap.terminal_reason);
    }
}
