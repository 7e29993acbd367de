//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryAuditStore`, `MemoryUnitStore`, and `MemoryPublishLedger`
//! that satisfy the trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryAuditStore
// ---------------------------------------------------------------------------

/// In-memory audit log backed by a `Vec<AuditRecord>` indexed by `seq - 1`.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
    unavailable: AtomicBool,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Rewrite a stored record in place, bypassing the append-only contract.
    ///
    /// Exists so tests can simulate tampering with the underlying storage.
    pub fn tamper(&self, seq: u64, f: impl FnOnce(&mut AuditRecord)) -> bool {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match seq.checked_sub(1).and_then(|i| records.get_mut(i as usize)) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Remove a stored record, bypassing the append-only contract.
    pub fn tamper_remove(&self, seq: u64) -> Option<AuditRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = seq.checked_sub(1)? as usize;
        (idx < records.len()).then(|| records.remove(idx))
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> StorageResult<()> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let expected = records.len() as u64 + 1;
        if record.seq != expected {
            return Err(StorageError::SequenceConflict {
                expected,
                actual: record.seq,
            });
        }
        records.push(record);
        Ok(())
    }

    async fn head(&self) -> StorageResult<Option<AuditRecord>> {
        self.check_available()?;
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.last().cloned())
    }

    async fn range(&self, from: u64, to: u64) -> StorageResult<Vec<AuditRecord>> {
        self.check_available()?;
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.seq >= from && r.seq <= to)
            .cloned()
            .collect())
    }

    async fn by_session(&self, session_id: &str) -> StorageResult<Vec<AuditRecord>> {
        self.check_available()?;
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryUnitStore
// ---------------------------------------------------------------------------

/// In-memory unit store backed by a `HashMap<unit_id, UnitSnapshot>`.
#[derive(Debug, Default)]
pub struct MemoryUnitStore {
    units: Mutex<HashMap<String, UnitSnapshot>>,
}

impl MemoryUnitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UnitStore for MemoryUnitStore {
    async fn save(&self, snapshot: UnitSnapshot) -> StorageResult<()> {
        let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        units.insert(snapshot.unit_id.clone(), snapshot);
        Ok(())
    }

    async fn load(&self, unit_id: &str) -> StorageResult<UnitSnapshot> {
        let units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        units
            .get(unit_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "unit",
                key: unit_id.to_string(),
            })
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> StorageResult<Vec<UnitSnapshot>> {
        let units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<UnitSnapshot> = units
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// MemoryPublishLedger
// ---------------------------------------------------------------------------

/// In-memory publish ledger backed by a `Vec<PublishRecord>`.
#[derive(Debug, Default)]
pub struct MemoryPublishLedger {
    records: Mutex<Vec<PublishRecord>>,
}

impl MemoryPublishLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PublishLedger for MemoryPublishLedger {
    async fn record(&self, record: PublishRecord) -> StorageResult<()> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
        Ok(())
    }

    async fn history(&self, destination: &str) -> StorageResult<Vec<PublishRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.destination == destination)
            .cloned()
            .collect())
    }

    async fn published_hashes(&self) -> StorageResult<Vec<(String, ContentDigest)>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .filter(|r| r.outcome == PublishOutcome::Published)
            .map(|r| (r.destination.clone(), r.content_hash.clone()))
            .collect())
    }
}
