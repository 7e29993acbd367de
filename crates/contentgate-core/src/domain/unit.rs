//! The content unit: the work item driven through the pipeline.

use chrono::{DateTime, Utc};
use contentgate_state::UnitSnapshot;
use serde::{Deserialize, Serialize};

use crate::audit::AuditEventId;
use crate::domain::decision::{Decision, GateKind, RewriteDirective};
use crate::domain::error::Result;
use crate::domain::package::ContentPackage;
use crate::domain::reference::{Reference, UsageContext};
use crate::resilience::PublishAttempt;

/// Lifecycle state.
///
/// ```text
/// Intake -> ReferenceMapped -> RightsChecked -> Generated -> QualityChecked -> Published
///    ^                              |   ^                         |
///    +------ rights REWRITE --------+   +----- quality REWRITE ---+
/// any checkpoint -> Archived
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Intake,
    ReferenceMapped,
    RightsChecked,
    Generated,
    QualityChecked,
    Published,
    Archived,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Published | UnitState::Archived)
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnitState::Intake => "intake",
            UnitState::ReferenceMapped => "reference_mapped",
            UnitState::RightsChecked => "rights_checked",
            UnitState::Generated => "generated",
            UnitState::QualityChecked => "quality_checked",
            UnitState::Published => "published",
            UnitState::Archived => "archived",
        };
        f.write_str(s)
    }
}

/// Rewrite loop counters, one per gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteCounters {
    pub rights: u32,
    pub quality: u32,
}

impl RewriteCounters {
    pub fn get(&self, gate: GateKind) -> u32 {
        match gate {
            GateKind::Rights => self.rights,
            GateKind::Quality => self.quality,
            GateKind::Override => 0,
        }
    }

    pub(crate) fn increment(&mut self, gate: GateKind) -> u32 {
        let slot = match gate {
            GateKind::Rights => &mut self.rights,
            GateKind::Quality => &mut self.quality,
            GateKind::Override => return 0,
        };
        *slot += 1;
        *slot
    }
}

/// Why a unit left the pipeline, and which audit event recorded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalReason {
    pub reason: String,
    pub audit_event: AuditEventId,
}

/// Creative brief submitted by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBrief {
    pub tenant_id: String,
    pub destination: String,
    /// Creative direction, e.g. "cozy desk setup in the style of ..."
    pub direction: String,
    /// Product being promoted
    #[serde(default)]
    pub product: String,
}

/// A pending rewrite for one reference's usage context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRewrite {
    pub reference_id: String,
    pub directive: RewriteDirective,
}

/// The work item. Owned by the orchestrator; every field changes only
/// through `Orchestrator::advance` or the service's override path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub unit_id: String,
    pub tenant_id: String,
    pub state: UnitState,
    pub brief: ContentBrief,
    pub references: Vec<Reference>,
    pub usage_contexts: Vec<UsageContext>,
    pub pending_rewrites: Vec<PendingRewrite>,
    /// Notes from the last quality REWRITE, handed to the generator
    pub revision_notes: Vec<String>,
    pub package: Option<ContentPackage>,
    pub counters: RewriteCounters,
    /// Rights decisions of the current pass
    pub rights_decisions: Vec<Decision>,
    pub last_decision: Option<Decision>,
    /// Set by an elevated identity; lets review-band risk pass the quality gate
    pub elevated_review: bool,
    pub last_publish: Option<PublishAttempt>,
    pub retry_after: Option<DateTime<Utc>>,
    pub terminal: Option<TerminalReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentUnit {
    pub fn new(brief: ContentBrief, references: Vec<Reference>, now: DateTime<Utc>) -> Self {
        Self {
            unit_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: brief.tenant_id.clone(),
            state: UnitState::Intake,
            brief,
            references,
            usage_contexts: Vec::new(),
            pending_rewrites: Vec::new(),
            revision_notes: Vec::new(),
            package: None,
            counters: RewriteCounters::default(),
            rights_decisions: Vec::new(),
            last_decision: None,
            elevated_review: false,
            last_publish: None,
            retry_after: None,
            terminal: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Highest risk score among the current rights decisions.
    pub fn max_risk_score(&self) -> Option<u8> {
        self.rights_decisions
            .iter()
            .filter_map(|d| d.risk_score)
            .max()
    }

    pub fn snapshot(&self) -> Result<UnitSnapshot> {
        Ok(UnitSnapshot {
            unit_id: self.unit_id.clone(),
            tenant_id: self.tenant_id.clone(),
            state: self.state.to_string(),
            terminal_reason: self.terminal.as_ref().map(|t| t.reason.clone()),
            payload: serde_json::to_value(self)?,
            updated_at: self.updated_at,
        })
    }

    pub fn from_snapshot(snapshot: &UnitSnapshot) -> Result<Self> {
        Ok(serde_json::from_value(snapshot.payload.clone())?)
    }
}
