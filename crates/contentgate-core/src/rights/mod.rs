//! Risk & rights evaluator.
//!
//! Pure rule evaluation over a [`Reference`] and the [`UsageContext`] it is
//! used in. No generative judgment is consulted; the same inputs always
//! produce the same verdict and score.
//!
//! Risk score = base risk for the usage type and outcome, plus 5 per
//! distinct protected element, capped at 100 (100 outright for blocked
//! references). Protected elements are every element flagged on the
//! reference, whether or not the context names it, plus registry
//! trademarks found in the context. The verdict itself only looks at what
//! the context names, so a context with every element stripped still
//! passes. Bands:
//!
//! | score                    | effect                                   |
//! |--------------------------|------------------------------------------|
//! | below review threshold   | auto-approve eligible                    |
//! | review..reject threshold | `requires_review` set on the decision    |
//! | reject threshold and up  | REJECT regardless of the handler verdict |

mod handlers;
pub mod patterns;
mod registry;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::domain::digest::digest_of;
use crate::domain::{Decision, GateKind, Reference, Result, UsageContext, Verdict};

pub use handlers::base_risk;
pub use registry::RightsRegistry;

use handlers::{handler_for, Assessment, Finding};

/// Points added per distinct protected element.
pub const ELEMENT_PENALTY: u8 = 5;

#[derive(Debug, Clone)]
pub struct RightsEvaluator {
    registry: RightsRegistry,
    review_threshold: u8,
    reject_threshold: u8,
}

impl RightsEvaluator {
    pub fn new(registry: RightsRegistry, config: &PipelineConfig) -> Self {
        Self {
            registry,
            review_threshold: config.risk_review_threshold,
            reject_threshold: config.risk_reject_threshold,
        }
    }

    pub fn registry(&self) -> &RightsRegistry {
        &self.registry
    }

    /// Evaluate one reference in its usage context.
    pub fn evaluate(
        &self,
        reference: &Reference,
        context: &UsageContext,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let input_hash = digest_of(&serde_json::json!({
            "reference": reference,
            "context": context,
        }))?;

        let (finding, blocked) = match self.registry.block_reason(&reference.id) {
            Some(why) => (
                Finding {
                    verdict: Verdict::Reject,
                    base_risk: 100,
                    reason: format!("reference is blocked: {why}"),
                    rewrite: None,
                    elements: Default::default(),
                },
                true,
            ),
            None => {
                let assessment = Assessment {
                    reference,
                    context,
                    registry: &self.registry,
                    now,
                };
                (handler_for(&reference.usage)(&assessment), false)
            }
        };

        let score = risk_score(reference, &finding, blocked);
        let mut verdict = finding.verdict;
        let mut reason = finding.reason;
        let mut rewrite = finding.rewrite;

        if score >= self.reject_threshold && verdict != Verdict::Reject {
            verdict = Verdict::Reject;
            reason = format!(
                "{reason}; risk score {score} is at or above the reject threshold {}",
                self.reject_threshold
            );
            rewrite = None;
        }

        let mut decision =
            Decision::new(GateKind::Rights, &reference.id, verdict, reason, input_hash, now)
                .with_score(score);
        if let Some((instructions, directive)) = rewrite {
            decision = decision.with_rewrite(instructions, directive);
        }
        if verdict != Verdict::Reject && score >= self.review_threshold {
            decision = decision.requiring_review();
        }

        debug!(
            reference = %reference.id,
            usage = %reference.usage,
            verdict = %decision.verdict,
            score,
            "rights evaluated"
        );
        Ok(decision)
    }
}

fn risk_score(reference: &Reference, finding: &Finding, blocked: bool) -> u8 {
    if blocked {
        return 100;
    }
    let distinct: BTreeSet<String> = reference
        .flagged_elements
        .iter()
        .chain(&finding.elements)
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    let penalty = (distinct.len() as u32).saturating_mul(ELEMENT_PENALTY as u32);
    (finding.base_risk as u32 + penalty).min(100) as u8
}
