//! Hash-chain computation and verification over stored audit records.

use chrono::Duration;
use contentgate_state::{AuditRecord, ContentDigest};
use serde::{Deserialize, Serialize};

use crate::domain::digest::digest_of;
use crate::domain::error::Result;

/// Digest of every field of `record` except `event_hash` itself.
pub fn event_hash(record: &AuditRecord) -> Result<ContentDigest> {
    digest_of(&serde_json::json!({
        "seq": record.seq,
        "event_id": record.event_id,
        "actor": record.actor,
        "action": record.action,
        "input_hash": record.input_hash,
        "output_hash": record.output_hash,
        "decision": record.decision,
        "reason": record.reason,
        "session_id": record.session_id,
        "tags": record.tags,
        "timestamp": record.timestamp,
        "previous_hash": record.previous_hash,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    HashMismatch,
    BrokenLink,
    SequenceGap,
    TimestampRegression,
}

/// The first point at which a chain failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub seq: u64,
    pub kind: BreakKind,
    pub detail: String,
}

/// Result of verifying a contiguous segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub from: u64,
    pub to: u64,
    /// Records checked before the first break (or all of them)
    pub verified: u64,
    pub first_break: Option<ChainBreak>,
}

impl ChainReport {
    /// Report for a log with no records.
    pub fn empty() -> Self {
        Self {
            from: 1,
            to: 0,
            verified: 0,
            first_break: None,
        }
    }

    pub fn intact(&self) -> bool {
        self.first_break.is_none()
    }
}

/// Verify `records` as the contiguous segment `from..=to`.
///
/// `predecessor` is the record at `from - 1` (`None` when `from == 1`, in
/// which case the first record must link to the genesis digest). Fails
/// closed: a missing record anywhere in the segment is a `SequenceGap`.
pub fn verify_records(
    records: &[AuditRecord],
    from: u64,
    to: u64,
    predecessor: Option<&AuditRecord>,
    skew_tolerance: Duration,
) -> Result<ChainReport> {
    let mut report = ChainReport {
        from,
        to,
        verified: 0,
        first_break: None,
    };

    let genesis = ContentDigest::genesis();
    let mut prev_hash = predecessor.map(|p| &p.event_hash).unwrap_or(&genesis);
    // latest timestamp so far; small regressions must not accumulate
    let mut high_water = predecessor.map(|p| p.timestamp);
    let mut iter = records.iter();

    for expected_seq in from..=to {
        let Some(record) = iter.next() else {
            report.first_break = Some(ChainBreak {
                seq: expected_seq,
                kind: BreakKind::SequenceGap,
                detail: format!("record {expected_seq} missing"),
            });
            return Ok(report);
        };

        if record.seq != expected_seq {
            report.first_break = Some(ChainBreak {
                seq: expected_seq,
                kind: BreakKind::SequenceGap,
                detail: format!("expected seq {expected_seq}, found {}", record.seq),
            });
            return Ok(report);
        }

        let computed = event_hash(record)?;
        if computed != record.event_hash {
            report.first_break = Some(ChainBreak {
                seq: record.seq,
                kind: BreakKind::HashMismatch,
                detail: format!(
                    "stored {} but fields hash to {}",
                    record.event_hash.short(),
                    computed.short()
                ),
            });
            return Ok(report);
        }

        if &record.previous_hash != prev_hash {
            report.first_break = Some(ChainBreak {
                seq: record.seq,
                kind: BreakKind::BrokenLink,
                detail: format!(
                    "links to {} but predecessor is {}",
                    record.previous_hash.short(),
                    prev_hash.short()
                ),
            });
            return Ok(report);
        }

        if let Some(latest) = high_water {
            if record.timestamp < latest - skew_tolerance {
                report.first_break = Some(ChainBreak {
                    seq: record.seq,
                    kind: BreakKind::TimestampRegression,
                    detail: format!(
                        "timestamp {} precedes earlier record at {} beyond tolerance",
                        record.timestamp, latest
                    ),
                });
                return Ok(report);
            }
        }

        prev_hash = &record.event_hash;
        high_water = Some(high_water.map_or(record.timestamp, |t| t.max(record.timestamp)));
        report.verified += 1;
    }

    Ok(report)
}
