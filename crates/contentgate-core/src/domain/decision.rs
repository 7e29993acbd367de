//! Gate decisions.

use chrono::{DateTime, Utc};
use contentgate_state::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::domain::digest::digest_of;
use crate::domain::error::Result;

/// Three-way gate verdict, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approve,
    Rewrite,
    Reject,
}

impl Verdict {
    /// Most severe verdict of the set; `None` when empty.
    pub fn most_severe<I: IntoIterator<Item = Verdict>>(verdicts: I) -> Option<Verdict> {
        verdicts.into_iter().max()
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Approve => f.write_str("APPROVE"),
            Verdict::Rewrite => f.write_str("REWRITE"),
            Verdict::Reject => f.write_str("REJECT"),
        }
    }
}

/// Which checkpoint issued a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Rights,
    Quality,
    Override,
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateKind::Rights => f.write_str("rights"),
            GateKind::Quality => f.write_str("quality"),
            GateKind::Override => f.write_str("override"),
        }
    }
}

/// Machine-readable rewrite instruction, applied by the stage a REWRITE
/// routes back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewriteDirective {
    /// Remove these names or phrases from the usage context.
    StripElements { elements: Vec<String> },
    /// Reframe the usage context as review or commentary.
    ReframeAsCommentary,
    /// Regenerate the content package, addressing the notes.
    Regenerate { notes: Vec<String> },
}

/// The output of a gate. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub gate: GateKind,
    /// Reference id for rights decisions, package id for quality decisions
    pub subject: String,
    pub verdict: Verdict,
    /// 0-100, rights decisions only
    pub risk_score: Option<u8>,
    pub reason: String,
    pub rewrite_instructions: Option<String>,
    pub directive: Option<RewriteDirective>,
    /// Score fell in the elevated-review band
    pub requires_review: bool,
    pub input_hash: ContentDigest,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        gate: GateKind,
        subject: impl Into<String>,
        verdict: Verdict,
        reason: impl Into<String>,
        input_hash: ContentDigest,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            decision_id: uuid::Uuid::new_v4().to_string(),
            gate,
            subject: subject.into(),
            verdict,
            risk_score: None,
            reason: reason.into(),
            rewrite_instructions: None,
            directive: None,
            requires_review: false,
            input_hash,
            decided_at,
        }
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.risk_score = Some(score.min(100));
        self
    }

    pub fn with_rewrite(mut self, instructions: impl Into<String>, directive: RewriteDirective) -> Self {
        self.rewrite_instructions = Some(instructions.into());
        self.directive = Some(directive);
        self
    }

    pub fn requiring_review(mut self) -> Self {
        self.requires_review = true;
        self
    }

    pub fn is_approve(&self) -> bool {
        self.verdict == Verdict::Approve
    }

    /// Digest of the decision outcome (verdict, score, reason, directive).
    pub fn output_hash(&self) -> Result<ContentDigest> {
        digest_of(&serde_json::json!({
            "gate": self.gate,
            "subject": self.subject,
            "verdict": self.verdict,
            "risk_score": self.risk_score,
            "reason": self.reason,
            "rewrite_instructions": self.rewrite_instructions,
            "directive": self.directive,
            "requires_review": self.requires_review,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(verdict: Verdict) -> Decision {
        Decision::new(
            GateKind::Rights,
            "ref-1",
            verdict,
            "test",
            ContentDigest::from_bytes(b"input"),
            Utc::now(),
        )
    }

    #[test]
    fn verdict_severity_order() {
        assert_eq!(
            Verdict::most_severe([Verdict::Approve, Verdict::Reject, Verdict::Rewrite]),
            Some(Verdict::Reject)
        );
        assert_eq!(
            Verdict::most_severe([Verdict::Approve, Verdict::Rewrite]),
            Some(Verdict::Rewrite)
        );
        assert_eq!(Verdict::most_severe([]), None);
    }

    #[test]
    fn verdict_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&Verdict::Rewrite).unwrap(),
            "\"REWRITE\""
        );
    }

    #[test]
    fn output_hash_tracks_outcome_not_identity() {
        let a = decision(Verdict::Approve).with_score(10);
        let b = decision(Verdict::Approve).with_score(10);
        assert_ne!(a.decision_id, b.decision_id);
        assert_eq!(a.output_hash().unwrap(), b.output_hash().unwrap());

        let c = decision(Verdict::Approve).with_score(11);
        assert_ne!(a.output_hash().unwrap(), c.output_hash().unwrap());
    }

    #[test]
    fn score_is_capped() {
        assert_eq!(decision(Verdict::Reject).with_score(250).risk_score, Some(100));
    }

    #[test]
    fn directive_serializes_tagged() {
        let d = RewriteDirective::StripElements {
            elements: vec!["Tanjiro".to_string()],
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["type"], "strip_elements");
        assert_eq!(json["elements"][0], "Tanjiro");
    }
}
