//! Audit export artifact: `audit.json` plus `audit.digest`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use contentgate_state::{AuditRecord, ContentDigest};
use serde::{Deserialize, Serialize};

use super::chain::{verify_records, ChainReport};
use super::trail::AuditTrail;
use super::AuditEventId;
use crate::domain::error::{GateError, Result};

/// A full copy of the log with the verification result at export time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditExport {
    pub exported_at: DateTime<Utc>,
    pub report: ChainReport,
    pub events: Vec<AuditRecord>,
}

impl AuditExport {
    pub async fn capture(trail: &AuditTrail) -> Result<Self> {
        let head = trail.head().await?.unwrap_or(AuditEventId(0));
        let events = if head.0 == 0 {
            Vec::new()
        } else {
            trail.read(AuditEventId(1), head).await?
        };
        let report = trail.verify_all().await?;
        Ok(Self {
            exported_at: trail.clock().now(),
            report,
            events,
        })
    }

    /// Re-verify the exported events offline.
    pub fn reverify(&self, skew_tolerance: chrono::Duration) -> Result<ChainReport> {
        let to = self.events.last().map(|r| r.seq).unwrap_or(0);
        verify_records(&self.events, 1, to, None, skew_tolerance)
    }
}

/// Write `<dir>/audit.json` and `<dir>/audit.digest`.
pub fn write_audit_export(export: &AuditExport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join("audit.json");
    let digest_path = dir.join("audit.digest");
    let json = serde_json::to_vec_pretty(export)?;
    let digest = ContentDigest::from_bytes(&json);

    std::fs::write(&path, &json)?;
    std::fs::write(&digest_path, digest.as_str().as_bytes())?;

    Ok(path)
}

/// Read `<dir>/audit.json` and check it against `<dir>/audit.digest`.
pub fn read_audit_export(dir: &Path) -> Result<AuditExport> {
    let json = std::fs::read(dir.join("audit.json"))?;
    let expected = std::fs::read_to_string(dir.join("audit.digest"))?;
    let actual = ContentDigest::from_bytes(&json);
    if expected.trim() != actual.as_str() {
        return Err(GateError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
