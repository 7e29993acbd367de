//! Quality gate: deterministic checks on a finished content package.
//!
//! Checks run in order and the first failure decides:
//!
//! 1. every rights decision for the package's references is APPROVE
//! 2. risk is below the review band, or inside it with elevated review
//! 3. every caption variant carries a disclosure (auto-repaired once)
//! 4. the content hash is new for the destination
//! 5. the structural score meets the threshold

pub mod disclosure;
pub mod score;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use contentgate_state::ContentDigest;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use disclosure::{add_disclosure, has_disclosure, validate_caption, CaptionIssue};
pub use score::QualityScore;

use crate::config::PipelineConfig;
use crate::domain::{ContentPackage, Decision, GateKind, Result, RewriteDirective, Verdict};
use crate::resilience::DuplicateIndex;

/// A disclosure inserted by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureRepair {
    pub platform: String,
    pub before: String,
    pub after: String,
}

/// What the gate needs to know beyond the package itself.
#[derive(Debug, Clone, Copy)]
pub struct QualityContext<'a> {
    pub rights_decisions: &'a [Decision],
    pub elevated_review: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityReport {
    pub decision: Decision,
    pub repairs: Vec<DisclosureRepair>,
    /// Hash of the package as it leaves the gate, after repairs
    pub content_hash: ContentDigest,
    /// `None` when an earlier check decided
    pub score: Option<QualityScore>,
}

pub struct QualityGate {
    quality_threshold: u8,
    review_threshold: u8,
    reject_threshold: u8,
    index: Arc<DuplicateIndex>,
}

enum Step {
    Pass,
    Fail {
        verdict: Verdict,
        reason: String,
        notes: Vec<String>,
    },
}

fn rewrite(reason: impl Into<String>, notes: Vec<String>) -> Step {
    Step::Fail {
        verdict: Verdict::Rewrite,
        reason: reason.into(),
        notes,
    }
}

fn reject(reason: impl Into<String>) -> Step {
    Step::Fail {
        verdict: Verdict::Reject,
        reason: reason.into(),
        notes: Vec::new(),
    }
}

impl QualityGate {
    pub fn new(config: &PipelineConfig, index: Arc<DuplicateIndex>) -> Self {
        Self {
            quality_threshold: config.quality_threshold,
            review_threshold: config.risk_review_threshold,
            reject_threshold: config.risk_reject_threshold,
            index,
        }
    }

    /// Run the gate. Disclosure repairs are applied to `package` in place.
    pub fn check(
        &self,
        package: &mut ContentPackage,
        ctx: QualityContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<QualityReport> {
        let input_hash = package.content_hash()?;
        let mut repairs = Vec::new();
        let mut score = None;

        let mut step = self.rights_approved(package, ctx.rights_decisions);
        if let Step::Pass = step {
            step = self.risk_band(ctx);
        }
        if let Step::Pass = step {
            step = disclosure_step(package, &mut repairs);
        }
        let content_hash = package.content_hash()?;
        if let Step::Pass = step {
            step = self.not_duplicate(package, &content_hash);
        }
        if let Step::Pass = step {
            let s = score::score(package);
            score = Some(s);
            step = self.score_step(s);
        }

        let decision = match step {
            Step::Pass => Decision::new(
                GateKind::Quality,
                &package.package_id,
                Verdict::Approve,
                match score {
                    Some(s) => format!("all checks passed, quality score {}", s.total),
                    None => "all checks passed".to_string(),
                },
                input_hash,
                now,
            ),
            Step::Fail {
                verdict,
                reason,
                notes,
            } => {
                let d = Decision::new(
                    GateKind::Quality,
                    &package.package_id,
                    verdict,
                    reason,
                    input_hash,
                    now,
                );
                if verdict == Verdict::Rewrite {
                    let instructions = notes.join("; ");
                    d.with_rewrite(instructions, RewriteDirective::Regenerate { notes })
                } else {
                    d
                }
            }
        };

        info!(
            package_id = %package.package_id,
            destination = %package.destination,
            verdict = %decision.verdict,
            repairs = repairs.len(),
            score = score.map(|s| i64::from(s.total)).unwrap_or(-1),
            "quality gate decided"
        );
        Ok(QualityReport {
            decision,
            repairs,
            content_hash,
            score,
        })
    }

    fn rights_approved(&self, package: &ContentPackage, decisions: &[Decision]) -> Step {
        if decisions.is_empty() {
            return reject("no rights decisions on record for the package's references");
        }
        if let Some(missing) = package
            .reference_ids
            .iter()
            .find(|id| !decisions.iter().any(|d| &d.subject == *id))
        {
            return reject(format!("reference {missing} has no rights decision"));
        }
        match decisions.iter().find(|d| !d.is_approve()) {
            Some(d) => reject(format!(
                "rights decision for {} is {}: {}",
                d.subject, d.verdict, d.reason
            )),
            None => Step::Pass,
        }
    }

    fn risk_band(&self, ctx: QualityContext<'_>) -> Step {
        let risk = ctx
            .rights_decisions
            .iter()
            .filter_map(|d| d.risk_score)
            .max()
            .unwrap_or(0);
        if risk >= self.reject_threshold {
            return reject(format!(
                "risk score {risk} is at or above the reject threshold {}",
                self.reject_threshold
            ));
        }
        if risk >= self.review_threshold && !ctx.elevated_review {
            return rewrite(
                format!("risk score {risk} requires elevated review"),
                vec![format!("awaiting elevated review for risk score {risk}")],
            );
        }
        Step::Pass
    }

    fn not_duplicate(&self, package: &ContentPackage, hash: &ContentDigest) -> Step {
        if self.index.contains(&package.destination, hash) {
            reject(format!(
                "content hash {} already published to {}",
                hash.short(),
                package.destination
            ))
        } else {
            Step::Pass
        }
    }

    fn score_step(&self, s: QualityScore) -> Step {
        if s.total >= self.quality_threshold {
            return Step::Pass;
        }
        let mut notes = Vec::new();
        if s.hook < score::HOOK_WEIGHT {
            notes.push("strengthen the hook: be specific, use a number or a question".to_string());
        }
        if s.assets == 0 {
            notes.push("attach at least one media asset".to_string());
        }
        if s.captions < score::CAPTION_WEIGHT {
            notes.push("write a complete caption for every platform variant".to_string());
        }
        rewrite(
            format!(
                "quality score {} is below the threshold {}",
                s.total, self.quality_threshold
            ),
            notes,
        )
    }
}

/// Check 3, with its single repair pass.
fn disclosure_step(package: &mut ContentPackage, repairs: &mut Vec<DisclosureRepair>) -> Step {
    if package.captions.is_empty() {
        return rewrite(
            "package has no caption variants",
            vec!["write a caption for each platform variant".to_string()],
        );
    }

    for caption in package.captions.iter_mut() {
        if let Err(CaptionIssue::MissingDisclosure { .. }) =
            validate_caption(&caption.text, &caption.platform)
        {
            let after = add_disclosure(&caption.text, &caption.platform);
            debug!(platform = %caption.platform, "disclosure inserted");
            repairs.push(DisclosureRepair {
                platform: caption.platform.clone(),
                before: std::mem::replace(&mut caption.text, after.clone()),
                after,
            });
        }
    }

    // re-run check 3 once over the repaired captions
    let issues: Vec<String> = package
        .captions
        .iter()
        .filter_map(|c| {
            validate_caption(&c.text, &c.platform)
                .err()
                .map(|e| format!("{}: {e}", c.platform))
        })
        .collect();
    if issues.is_empty() {
        Step::Pass
    } else {
        rewrite(
            format!("disclosure check failed: {}", issues.join("; ")),
            issues,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetKind, CaptionVariant};

    fn gate() -> QualityGate {
        QualityGate::new(&PipelineConfig::default(), Arc::new(DuplicateIndex::new()))
    }

    fn approved(subject: &str, score: u8) -> Decision {
        Decision::new(
            GateKind::Rights,
            subject,
            Verdict::Approve,
            "ok",
            ContentDigest::from_bytes(subject.as_bytes()),
            Utc::now(),
        )
        .with_score(score)
    }

    fn package(caption: &str) -> ContentPackage {
        ContentPackage {
            package_id: "pkg-1".to_string(),
            unit_id: "u1".to_string(),
            destination: "tiktok".to_string(),
            hook: "3 desk upgrades under $20".to_string(),
            captions: vec![CaptionVariant::new("tiktok", caption)],
            assets: vec![Asset {
                kind: AssetKind::Video,
                uri: "s3://v.mp4".to_string(),
            }],
            reference_ids: vec!["r1".to_string()],
        }
    }

    #[test]
    fn review_band_needs_elevation() {
        let decisions = [approved("r1", 45)];
        let mut p = package("Three cheap upgrades I use daily #ad");
        let ctx = QualityContext {
            rights_decisions: &decisions,
            elevated_review: false,
        };
        let report = gate().check(&mut p, ctx, Utc::now()).unwrap();
        assert_eq!(report.decision.verdict, Verdict::Rewrite);

        let ctx = QualityContext {
            rights_decisions: &decisions,
            elevated_review: true,
        };
        let report = gate().check(&mut p, ctx, Utc::now()).unwrap();
        assert_eq!(report.decision.verdict, Verdict::Approve);
    }

    #[test]
    fn reference_without_decision_is_rejected() {
        let decisions = [approved("other", 10)];
        let mut p = package("Three cheap upgrades I use daily #ad");
        let ctx = QualityContext {
            rights_decisions: &decisions,
            elevated_review: false,
        };
        let report = gate().check(&mut p, ctx, Utc::now()).unwrap();
        assert_eq!(report.decision.verdict, Verdict::Reject);
        assert!(report.decision.reason.contains("r1"));
    }

    #[test]
    fn deceptive_caption_routes_to_regeneration() {
        let decisions = [approved("r1", 10)];
        let mut p = package("Stumbled upon this lamp, love it #ad");
        let ctx = QualityContext {
            rights_decisions: &decisions,
            elevated_review: false,
        };
        let report = gate().check(&mut p, ctx, Utc::now()).unwrap();
        assert_eq!(report.decision.verdict, Verdict::Rewrite);
        assert!(matches!(
            report.decision.directive,
            Some(RewriteDirective::Regenerate { .. })
        ));
        assert!(report.repairs.is_empty());
    }

    #[test]
    fn high_risk_fails_even_when_everything_else_passes() {
        let decisions = [approved("r1", 85)];
        let mut p = package("Three cheap upgrades I use daily #ad");
        let ctx = QualityContext {
            rights_decisions: &decisions,
            elevated_review: true,
        };
        let report = gate().check(&mut p, ctx, Utc::now()).unwrap();
        assert_eq!(report.decision.verdict, Verdict::Reject);
        assert!(report.decision.reason.contains("risk score 85"));
        assert!(report.score.is_none());
    }

    #[test]
    fn missing_disclosure_is_repaired_and_passes() {
        let decisions = [approved("r1", 10)];
        let mut p = package("Three cheap upgrades I use daily");
        let ctx = QualityContext {
            rights_decisions: &decisions,
            elevated_review: false,
        };
        let report = gate().check(&mut p, ctx, Utc::now()).unwrap();
        assert_eq!(report.decision.verdict, Verdict::Approve);
        assert_eq!(report.repairs.len(), 1);
        assert!(p.captions[0].text.contains("#ad"));
        assert_eq!(report.content_hash, p.content_hash().unwrap());
        assert_ne!(report.decision.input_hash, report.content_hash);
    }

    #[test]
    fn published_hash_is_rejected_as_duplicate() {
        let index = Arc::new(DuplicateIndex::new());
        let gate = QualityGate::new(&PipelineConfig::default(), index.clone());
        let decisions = [approved("r1", 10)];
        let mut p = package("Three cheap upgrades I use daily #ad");
        index.commit("tiktok", &p.content_hash().unwrap());

        let ctx = QualityContext {
            rights_decisions: &decisions,
            elevated_review: false,
        };
        let report = gate.check(&mut p, ctx, Utc::now()).unwrap();
        assert_eq!(report.decision.verdict, Verdict::Reject);
        assert!(report.decision.reason.contains("already published to tiktok"));
    }
}
