//! The audit trail handle shared by every component.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use contentgate_state::{AuditRecord, AuditStore, ContentDigest};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};

use super::chain::{event_hash, verify_records, ChainReport};
use super::{AuditEventId, NewAuditEvent};
use crate::domain::clock::Clock;
use crate::domain::error::{GateError, Result};
use crate::metrics::METRICS;

#[derive(Debug, Clone)]
struct ChainHead {
    seq: u64,
    hash: ContentDigest,
}

/// Append-only, hash-chained audit log.
///
/// Appends are serialized through an async mutex around the cached chain
/// head, so `seq` is gapless and each record links to the one before it.
/// Constructed once per process and passed by `Arc` to every component.
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    skew_tolerance: Duration,
    head: Mutex<Option<ChainHead>>,
    /// Highest seq known to verify
    verified_through: AtomicU64,
    halted: AtomicBool,
    halt_reason: std::sync::Mutex<Option<String>>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>, skew_tolerance: Duration) -> Self {
        Self {
            store,
            clock,
            skew_tolerance,
            head: Mutex::new(None),
            verified_through: AtomicU64::new(0),
            halted: AtomicBool::new(false),
            halt_reason: std::sync::Mutex::new(None),
        }
    }

    /// Append an event. Fails only when the store does.
    pub async fn append(&self, event: NewAuditEvent) -> Result<AuditEventId> {
        let mut head = self.head.lock().await;
        let current = match head.as_ref() {
            Some(h) => h.clone(),
            None => match self.store.head().await? {
                Some(r) => ChainHead {
                    seq: r.seq,
                    hash: r.event_hash,
                },
                None => ChainHead {
                    seq: 0,
                    hash: ContentDigest::genesis(),
                },
            },
        };

        let mut record = AuditRecord {
            seq: current.seq + 1,
            event_id: uuid::Uuid::new_v4().to_string(),
            actor: event.actor,
            action: event.action,
            input_hash: event.input_hash,
            output_hash: event.output_hash,
            decision: event.decision,
            reason: event.reason,
            session_id: event.session_id,
            tags: event.tags,
            timestamp: self.clock.now(),
            previous_hash: current.hash,
            event_hash: ContentDigest::genesis(),
        };
        record.event_hash = event_hash(&record)?;

        let seq = record.seq;
        let hash = record.event_hash.clone();
        debug!(seq, action = %record.action, session = %record.session_id, "audit append");

        if let Err(e) = self.store.append(record).await {
            // reload from the store next time
            *head = None;
            return Err(e.into());
        }
        *head = Some(ChainHead { seq, hash });
        METRICS.inc_audit_events();

        Ok(AuditEventId(seq))
    }

    /// Current head of the log, `None` when empty.
    pub async fn head(&self) -> Result<Option<AuditEventId>> {
        Ok(self.store.head().await?.map(|r| AuditEventId(r.seq)))
    }

    pub async fn read(&self, from: AuditEventId, to: AuditEventId) -> Result<Vec<AuditRecord>> {
        Ok(self.store.range(from.0, to.0).await?)
    }

    pub async fn events_for_session(&self, session_id: &str) -> Result<Vec<AuditRecord>> {
        Ok(self.store.by_session(session_id).await?)
    }

    /// Verify the segment `from..=to`, returning the first break if any.
    ///
    /// Read-only: repeated calls over an unmodified log give the same report.
    /// An inverted range is an error, never an intact report.
    pub async fn verify_report(&self, from: AuditEventId, to: AuditEventId) -> Result<ChainReport> {
        let from = from.0.max(1);
        let to = to.0;
        if from > to {
            return Err(GateError::InvalidRange { from, to });
        }

        let predecessor = if from > 1 {
            self.store.range(from - 1, from - 1).await?.into_iter().next()
        } else {
            None
        };
        if from > 1 && predecessor.is_none() {
            return Ok(ChainReport {
                from,
                to,
                verified: 0,
                first_break: Some(super::ChainBreak {
                    seq: from - 1,
                    kind: super::BreakKind::SequenceGap,
                    detail: format!("predecessor {} missing", from - 1),
                }),
            });
        }

        let records = self.store.range(from, to).await?;
        verify_records(&records, from, to, predecessor.as_ref(), self.skew_tolerance)
    }

    /// `true` iff the segment `from..=to` verifies.
    pub async fn verify_chain(&self, from: AuditEventId, to: AuditEventId) -> Result<bool> {
        Ok(self.verify_report(from, to).await?.intact())
    }

    /// Verify from genesis to the current head.
    pub async fn verify_all(&self) -> Result<ChainReport> {
        match self.head().await? {
            Some(head) => self.verify_report(AuditEventId(1), head).await,
            None => Ok(ChainReport::empty()),
        }
    }

    /// Verify everything appended since the last successful check.
    ///
    /// On a break the trail halts: every later call returns `Halted` until
    /// the process restarts with a repaired store.
    #[instrument(skip(self))]
    pub async fn ensure_intact(&self) -> Result<()> {
        if let Some(reason) = self.halt_reason() {
            return Err(GateError::Halted(reason));
        }

        let Some(head) = self.head().await? else {
            return Ok(());
        };
        let from = self.verified_through.load(Ordering::SeqCst) + 1;
        if from > head.0 {
            return Ok(());
        }
        let report = self.verify_report(AuditEventId(from), head).await?;

        match report.first_break {
            None => {
                self.verified_through.fetch_max(head.0, Ordering::SeqCst);
                Ok(())
            }
            Some(b) => {
                self.halt_on_break(&b);
                Err(GateError::ChainIntegrityFailure {
                    at: b.seq,
                    detail: b.detail,
                })
            }
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.halt_reason
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Stop the pipeline after a verification break.
    pub(crate) fn halt_on_break(&self, b: &super::ChainBreak) {
        let reason = format!("audit chain broken at seq {}: {}", b.seq, b.detail);
        error!(seq = b.seq, kind = ?b.kind, detail = %b.detail, "audit chain integrity failure");
        self.halt(reason);
        METRICS.inc_integrity_failures();
    }

    fn halt(&self, reason: String) {
        self.halted.store(true, Ordering::SeqCst);
        *self.halt_reason.lock().unwrap_or_else(|p| p.into_inner()) = Some(reason);
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
