//! Append-only, hash-chained audit trail.
//!
//! Every decision, transition, publish attempt, override and incident is
//! recorded here. Each record stores the SHA-256 of its own canonical fields
//! and of its predecessor, so any edit, removal or reordering is detected by
//! [`AuditTrail::verify_chain`].

mod chain;
mod export;
mod trail;

use contentgate_state::ContentDigest;
use serde::{Deserialize, Serialize};

pub use chain::{event_hash, verify_records, BreakKind, ChainBreak, ChainReport};
pub use export::{read_audit_export, write_audit_export, AuditExport};
pub use trail::AuditTrail;

/// Position of an event in the log (its 1-indexed sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEventId(pub u64);

impl std::fmt::Display for AuditEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event before it is sequenced, timestamped and hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewAuditEvent {
    pub actor: String,
    pub action: String,
    pub input_hash: Option<ContentDigest>,
    pub output_hash: Option<ContentDigest>,
    pub decision: Option<String>,
    pub reason: String,
    pub session_id: String,
    pub tags: Vec<String>,
}

impl NewAuditEvent {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn decision(mut self, decision: impl ToString) -> Self {
        self.decision = Some(decision.to_string());
        self
    }

    pub fn input(mut self, hash: ContentDigest) -> Self {
        self.input_hash = Some(hash);
        self
    }

    pub fn output(mut self, hash: ContentDigest) -> Self {
        self.output_hash = Some(hash);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}
