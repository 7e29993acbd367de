//! Pipeline orchestrator: the content unit state machine.
//!
//! `advance` applies exactly one transition per call:
//!
//! | from               | work                         | APPROVE          | REWRITE          | REJECT   |
//! |--------------------|------------------------------|------------------|------------------|----------|
//! | `Intake`           | map references to contexts   | `ReferenceMapped`|                  | archived |
//! | `ReferenceMapped`  | rights evaluation            | `RightsChecked`  | `Intake`         | archived |
//! | `RightsChecked`    | generation (executor)        | `Generated`      |                  |          |
//! | `Generated`        | quality gate                 | `QualityChecked` | `RightsChecked`  | archived |
//! | `QualityChecked`   | publish (resilience layer)   | `Published`      |                  | archived |
//!
//! Every REJECT archives the unit and is returned as
//! [`GateError::PolicyRejection`] carrying the reason and the audit event
//! that recorded it.

use std::sync::Arc;

use contentgate_state::{ContentDigest, PublishOutcome};
use tracing::{info, instrument, warn};

use crate::audit::{AuditEventId, AuditTrail, NewAuditEvent};
use crate::config::PipelineConfig;
use crate::domain::digest::digest_of;
use crate::domain::{
    ContentUnit, Decision, GateError, GateKind, PendingRewrite, Result, RewriteDirective,
    TerminalReason, UnitState, UsageContext, Verdict,
};
use crate::executor::ConcurrencyExecutor;
use crate::generation::{GenerationRequest, Generator};
use crate::incident::{IncidentKind, IncidentLog};
use crate::metrics::METRICS;
use crate::obs;
use crate::quality::{QualityContext, QualityGate};
use crate::resilience::ResilienceLayer;
use crate::rights::patterns::{reframe_as_commentary, strip_elements};
use crate::rights::RightsEvaluator;

/// One applied transition. `from == to` when a publish was queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub unit_id: String,
    pub from: UnitState,
    pub to: UnitState,
    pub verdict: Option<Verdict>,
    pub audit_event: AuditEventId,
}

pub struct Orchestrator {
    config: PipelineConfig,
    rights: RightsEvaluator,
    quality: QualityGate,
    resilience: Arc<ResilienceLayer>,
    executor: ConcurrencyExecutor,
    generator: Arc<dyn Generator>,
    audit: Arc<AuditTrail>,
    incidents: Arc<IncidentLog>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        rights: RightsEvaluator,
        quality: QualityGate,
        resilience: Arc<ResilienceLayer>,
        executor: ConcurrencyExecutor,
        generator: Arc<dyn Generator>,
        audit: Arc<AuditTrail>,
        incidents: Arc<IncidentLog>,
    ) -> Self {
        Self {
            config,
            rights,
            quality,
            resilience,
            executor,
            generator,
            audit,
            incidents,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rights(&self) -> &RightsEvaluator {
        &self.rights
    }

    /// Drive exactly one transition.
    #[instrument(skip(self, unit), fields(unit_id = %unit.unit_id, state = %unit.state))]
    pub async fn advance(&self, unit: &mut ContentUnit) -> Result<Transition> {
        if let Some(reason) = self.audit.halt_reason() {
            return self.refuse(unit, "refused", GateError::Halted(reason)).await;
        }

        match unit.state {
            UnitState::Intake => self.map_references(unit).await,
            UnitState::ReferenceMapped => self.check_rights(unit).await,
            UnitState::RightsChecked => self.generate(unit).await,
            UnitState::Generated => self.check_quality(unit).await,
            UnitState::QualityChecked => self.publish(unit).await,
            UnitState::Published | UnitState::Archived => {
                let err = GateError::InvalidTransition {
                    unit_id: unit.unit_id.clone(),
                    detail: format!("unit is {}", unit.state),
                };
                self.refuse(unit, "refused", err).await
            }
        }
    }

    // -- transitions -------------------------------------------------------

    async fn map_references(&self, unit: &mut ContentUnit) -> Result<Transition> {
        if unit.references.is_empty() {
            return self
                .reject(unit, "unit has no references to evaluate".to_string(), None)
                .await;
        }

        let reason = if unit.pending_rewrites.is_empty() {
            unit.usage_contexts = unit
                .references
                .iter()
                .map(|r| {
                    let note = r.usage_note.trim();
                    let text = if note.is_empty() {
                        unit.brief.direction.clone()
                    } else {
                        format!("{}. {note}", unit.brief.direction.trim_end_matches('.'))
                    };
                    UsageContext::new(&r.id, text)
                })
                .collect();
            format!("mapped {} references", unit.references.len())
        } else {
            let pending = std::mem::take(&mut unit.pending_rewrites);
            for rewrite in &pending {
                apply_directive(&mut unit.usage_contexts, rewrite)?;
            }
            format!("applied {} rewrite directives", pending.len())
        };

        self.transition(unit, UnitState::ReferenceMapped, None, reason, None)
            .await
    }

    async fn check_rights(&self, unit: &mut ContentUnit) -> Result<Transition> {
        if let Some(t) = self.enforce_ceiling(unit, GateKind::Rights, None).await? {
            return Ok(t);
        }

        let now = self.audit.clock().now();
        let mut decisions = Vec::with_capacity(unit.references.len());
        for reference in &unit.references {
            let context = unit
                .usage_contexts
                .iter()
                .find(|c| c.reference_id == reference.id)
                .ok_or_else(|| GateError::InvalidTransition {
                    unit_id: unit.unit_id.clone(),
                    detail: format!("no usage context for reference {}", reference.id),
                })?;
            let decision = self.rights.evaluate(reference, context, now)?;
            self.record_decision(&unit.unit_id, &decision).await?;
            decisions.push(decision);
        }

        let verdict = Verdict::most_severe(decisions.iter().map(|d| d.verdict))
            .unwrap_or(Verdict::Reject);
        let lead = decisions.iter().find(|d| d.verdict == verdict).cloned();
        let summary = decisions
            .iter()
            .filter(|d| d.verdict == verdict)
            .map(|d| format!("{}: {}", d.subject, d.reason))
            .collect::<Vec<_>>()
            .join("; ");

        unit.pending_rewrites = decisions
            .iter()
            .filter_map(|d| {
                d.directive.clone().map(|directive| PendingRewrite {
                    reference_id: d.subject.clone(),
                    directive,
                })
            })
            .collect();
        unit.rights_decisions = decisions;
        unit.last_decision = lead.clone();

        match verdict {
            Verdict::Approve => {
                unit.pending_rewrites.clear();
                self.transition(
                    unit,
                    UnitState::RightsChecked,
                    Some(Verdict::Approve),
                    "all references approved".to_string(),
                    None,
                )
                .await
            }
            Verdict::Rewrite => {
                self.route_rewrite(unit, GateKind::Rights, UnitState::Intake, summary, lead)
                    .await
            }
            Verdict::Reject => {
                unit.pending_rewrites.clear();
                self.reject(unit, format!("rights rejected: {summary}"), lead)
                    .await
            }
        }
    }

    async fn generate(&self, unit: &mut ContentUnit) -> Result<Transition> {
        if unit.rights_decisions.is_empty() || !unit.rights_decisions.iter().all(Decision::is_approve)
        {
            let err = GateError::InvalidTransition {
                unit_id: unit.unit_id.clone(),
                detail: "generation requires approved rights decisions".to_string(),
            };
            return self.refuse(unit, "refused", err).await;
        }

        let request = GenerationRequest {
            unit_id: unit.unit_id.clone(),
            brief: unit.brief.clone(),
            references: unit.references.clone(),
            usage_contexts: unit.usage_contexts.clone(),
            revision_notes: unit.revision_notes.clone(),
        };
        let generated = self
            .executor
            .submit(
                "generate",
                Some(self.config.generation_timeout()),
                self.generator.generate(&request),
            )
            .await
            .and_then(|mut package| {
                if package.destination != unit.brief.destination {
                    return Err(GateError::StageFailed {
                        stage: "generate".to_string(),
                        message: format!(
                            "package targets {}, brief targets {}",
                            package.destination, unit.brief.destination
                        ),
                    });
                }
                package.unit_id = unit.unit_id.clone();
                Ok(package)
            });

        let package = match generated {
            Ok(p) => p,
            Err(e) => {
                let err = match e {
                    e @ GateError::StageFailed { .. } => e,
                    other => GateError::StageFailed {
                        stage: "generate".to_string(),
                        message: other.to_string(),
                    },
                };
                self.audit
                    .append(
                        NewAuditEvent::new("orchestrator", "stage_failed", &unit.unit_id)
                            .decision(err.class())
                            .reason(err.to_string())
                            .tag("generate"),
                    )
                    .await?;
                return Err(err);
            }
        };

        let hash = package.content_hash()?;
        unit.package = Some(package);
        unit.revision_notes.clear();
        self.transition(
            unit,
            UnitState::Generated,
            None,
            "content package generated".to_string(),
            Some(hash),
        )
        .await
    }

    async fn check_quality(&self, unit: &mut ContentUnit) -> Result<Transition> {
        if let Some(t) = self.enforce_ceiling(unit, GateKind::Quality, None).await? {
            return Ok(t);
        }

        let now = self.audit.clock().now();
        let ctx = QualityContext {
            rights_decisions: &unit.rights_decisions,
            elevated_review: unit.elevated_review,
        };
        let Some(package) = unit.package.as_mut() else {
            return Err(GateError::InvalidTransition {
                unit_id: unit.unit_id.clone(),
                detail: "no content package to check".to_string(),
            });
        };
        let report = self.quality.check(package, ctx, now)?;

        for repair in &report.repairs {
            self.audit
                .append(
                    NewAuditEvent::new("quality_gate", "disclosure_repair", &unit.unit_id)
                        .input(digest_of(&repair.before)?)
                        .output(digest_of(&repair.after)?)
                        .reason(format!("disclosure inserted for {}", repair.platform))
                        .tag(repair.platform.clone()),
                )
                .await?;
        }
        self.record_decision(&unit.unit_id, &report.decision).await?;

        let decision = report.decision;
        unit.last_decision = Some(decision.clone());
        match decision.verdict {
            Verdict::Approve => {
                self.transition(
                    unit,
                    UnitState::QualityChecked,
                    Some(Verdict::Approve),
                    decision.reason.clone(),
                    Some(report.content_hash),
                )
                .await
            }
            Verdict::Rewrite => {
                if let Some(RewriteDirective::Regenerate { notes }) = &decision.directive {
                    unit.revision_notes = notes.clone();
                }
                let reason = decision.reason.clone();
                self.route_rewrite(
                    unit,
                    GateKind::Quality,
                    UnitState::RightsChecked,
                    reason,
                    Some(decision),
                )
                .await
            }
            Verdict::Reject => {
                let reason = format!("quality rejected: {}", decision.reason);
                self.reject(unit, reason, Some(decision)).await
            }
        }
    }

    async fn publish(&self, unit: &mut ContentUnit) -> Result<Transition> {
        if let Err(e) = self.ensure_publishable(unit) {
            return self.refuse(unit, "publish_denied", e).await;
        }

        let now = self.audit.clock().now();
        if let Some(at) = unit.retry_after.filter(|at| *at > now) {
            return Err(GateError::RateLimited {
                destination: unit.brief.destination.clone(),
                retry_after: at,
            });
        }

        if let Err(e) = self.audit.ensure_intact().await {
            if let GateError::ChainIntegrityFailure { .. } = &e {
                self.incidents
                    .raise(IncidentKind::ChainIntegrity, None, e.to_string(), &unit.unit_id)
                    .await;
            }
            return Err(e);
        }

        let package = unit
            .package
            .clone()
            .ok_or_else(|| GateError::PublishNotPermitted {
                unit_id: unit.unit_id.clone(),
                detail: "no content package".to_string(),
            })?;

        let attempt = match self
            .executor
            .submit("publish", None, self.resilience.publish(&unit.unit_id, &package))
            .await
        {
            Ok(a) => a,
            Err(GateError::PolicyRejection {
                reason,
                audit_event,
            }) => {
                self.incidents
                    .raise(
                        IncidentKind::PolicyViolation,
                        Some(&package.destination),
                        reason.clone(),
                        &unit.unit_id,
                    )
                    .await;
                self.archive(unit, reason.clone(), None).await?;
                return Err(GateError::PolicyRejection {
                    reason,
                    audit_event,
                });
            }
            Err(e) => return Err(e),
        };

        unit.last_publish = Some(attempt.clone());
        match attempt.outcome {
            PublishOutcome::Published => {
                unit.retry_after = None;
                let external_id = attempt.external_id.clone().unwrap_or_default();
                let t = self
                    .transition(
                        unit,
                        UnitState::Published,
                        Some(Verdict::Approve),
                        format!("published to {} as {external_id}", package.destination),
                        Some(attempt.content_hash.clone()),
                    )
                    .await?;
                unit.terminal = Some(TerminalReason {
                    reason: format!("published as {external_id}"),
                    audit_event: t.audit_event,
                });
                obs::emit_unit_published(&unit.unit_id, &package.destination, &external_id);
                METRICS.inc_published();
                Ok(t)
            }
            PublishOutcome::Queued | PublishOutcome::RateLimited => {
                unit.retry_after = attempt.retry_after;
                unit.updated_at = now;
                info!(
                    outcome = %attempt.outcome,
                    retry_after = ?attempt.retry_after,
                    "publish deferred"
                );
                Ok(Transition {
                    unit_id: unit.unit_id.clone(),
                    from: UnitState::QualityChecked,
                    to: UnitState::QualityChecked,
                    verdict: None,
                    audit_event: attempt.audit_event,
                })
            }
            PublishOutcome::Rejected => {
                let reason = attempt.reason.clone();
                self.reject(unit, reason, None).await
            }
            PublishOutcome::AuthFailed => Err(GateError::AuthFailure {
                destination: attempt.destination.clone(),
                message: attempt.reason.clone(),
            }),
        }
    }

    /// The only gate in front of a publish-capable call.
    pub fn ensure_publishable(&self, unit: &ContentUnit) -> Result<()> {
        let deny = |detail: &str| {
            Err(GateError::PublishNotPermitted {
                unit_id: unit.unit_id.clone(),
                detail: detail.to_string(),
            })
        };
        if unit.state != UnitState::QualityChecked {
            return deny(&format!("unit is {}, not quality_checked", unit.state));
        }
        match &unit.last_decision {
            Some(d) if d.gate == GateKind::Quality && d.verdict == Verdict::Approve => {}
            Some(d) => {
                return deny(&format!(
                    "most recent decision is {} from the {} gate",
                    d.verdict, d.gate
                ))
            }
            None => return deny("no decision on record"),
        }
        if unit.package.is_none() {
            return deny("no content package");
        }
        Ok(())
    }

    // -- overrides ---------------------------------------------------------

    /// Apply a human verdict. The caller has already checked privilege.
    ///
    /// REJECT archives; REWRITE sends the content back to generation with
    /// the reason code as a revision note; APPROVE grants elevated review,
    /// which lets review-band risk pass the quality gate. No override skips
    /// a gate.
    pub async fn apply_override(
        &self,
        unit: &mut ContentUnit,
        verdict: Verdict,
        reason_code: &str,
        actor: &str,
    ) -> Result<Transition> {
        if unit.is_terminal() {
            return Err(GateError::InvalidTransition {
                unit_id: unit.unit_id.clone(),
                detail: format!("unit is {}", unit.state),
            });
        }

        let now = self.audit.clock().now();
        let decision = Decision::new(
            GateKind::Override,
            &unit.unit_id,
            verdict,
            format!("override by {actor}: {reason_code}"),
            digest_of(&serde_json::json!({
                "unit_id": unit.unit_id,
                "state": unit.state,
                "verdict": verdict,
                "reason_code": reason_code,
            }))?,
            now,
        );
        let event = self
            .audit
            .append(
                NewAuditEvent::new(actor, "override", &unit.unit_id)
                    .input(decision.input_hash.clone())
                    .output(decision.output_hash()?)
                    .decision(verdict)
                    .reason(reason_code)
                    .tag("override"),
            )
            .await?;
        obs::emit_override(&unit.unit_id, actor, verdict, reason_code);

        match verdict {
            Verdict::Reject => {
                self.archive(unit, format!("override: {reason_code}"), Some(decision))
                    .await
            }
            Verdict::Rewrite => match unit.state {
                UnitState::Generated | UnitState::QualityChecked => {
                    unit.revision_notes = vec![format!("override: {reason_code}")];
                    unit.retry_after = None;
                    self.route_rewrite(
                        unit,
                        GateKind::Quality,
                        UnitState::RightsChecked,
                        format!("override: {reason_code}"),
                        Some(decision),
                    )
                    .await
                }
                UnitState::ReferenceMapped | UnitState::RightsChecked => {
                    self.route_rewrite(
                        unit,
                        GateKind::Rights,
                        UnitState::Intake,
                        format!("override: {reason_code}"),
                        Some(decision),
                    )
                    .await
                }
                _ => Err(GateError::InvalidTransition {
                    unit_id: unit.unit_id.clone(),
                    detail: format!("nothing to rewrite in state {}", unit.state),
                }),
            },
            Verdict::Approve => {
                unit.elevated_review = true;
                unit.updated_at = now;
                Ok(Transition {
                    unit_id: unit.unit_id.clone(),
                    from: unit.state,
                    to: unit.state,
                    verdict: Some(Verdict::Approve),
                    audit_event: event,
                })
            }
        }
    }

    // -- helpers -----------------------------------------------------------

    /// Record a refused step, then fail with `err`.
    async fn refuse(&self, unit: &ContentUnit, action: &str, err: GateError) -> Result<Transition> {
        warn!(action, error = %err, "step refused");
        self.audit
            .append(
                NewAuditEvent::new("orchestrator", action, &unit.unit_id)
                    .decision(err.class())
                    .reason(err.to_string())
                    .tag(unit.state.to_string()),
            )
            .await?;
        Err(err)
    }

    async fn record_decision(&self, unit_id: &str, decision: &Decision) -> Result<AuditEventId> {
        let actor = match decision.gate {
            GateKind::Rights => "rights_evaluator",
            GateKind::Quality => "quality_gate",
            GateKind::Override => "override",
        };
        let mut event = NewAuditEvent::new(actor, "decision", unit_id)
            .input(decision.input_hash.clone())
            .output(decision.output_hash()?)
            .decision(decision.verdict)
            .reason(decision.reason.clone())
            .tag(decision.gate.to_string())
            .tag(decision.subject.clone());
        if decision.requires_review {
            event = event.tag("requires_review");
        }
        let id = self.audit.append(event).await?;
        obs::emit_gate_decision(unit_id, decision.gate, decision.verdict, decision.risk_score);
        Ok(id)
    }

    async fn transition(
        &self,
        unit: &mut ContentUnit,
        to: UnitState,
        verdict: Option<Verdict>,
        reason: String,
        output: Option<ContentDigest>,
    ) -> Result<Transition> {
        let from = unit.state;
        let mut event = NewAuditEvent::new("orchestrator", "transition", &unit.unit_id)
            .reason(reason)
            .tag(format!("{from}->{to}"));
        if let Some(v) = verdict {
            event = event.decision(v);
        }
        if let Some(hash) = output {
            event = event.output(hash);
        }
        let audit_event = self.audit.append(event).await?;

        unit.state = to;
        unit.updated_at = self.audit.clock().now();
        obs::emit_transition(&unit.unit_id, from, to);
        METRICS.inc_transitions();

        Ok(Transition {
            unit_id: unit.unit_id.clone(),
            from,
            to,
            verdict,
            audit_event,
        })
    }

    async fn archive(
        &self,
        unit: &mut ContentUnit,
        reason: String,
        decision: Option<Decision>,
    ) -> Result<Transition> {
        if let Some(d) = decision {
            unit.last_decision = Some(d);
        }
        let t = self
            .transition(
                unit,
                UnitState::Archived,
                Some(Verdict::Reject),
                reason.clone(),
                None,
            )
            .await?;
        unit.retry_after = None;
        unit.terminal = Some(TerminalReason {
            reason: reason.clone(),
            audit_event: t.audit_event,
        });
        obs::emit_unit_archived(&unit.unit_id, &reason);
        METRICS.inc_archived();
        Ok(t)
    }

    /// Archive and surface the rejection to the caller.
    async fn reject(
        &self,
        unit: &mut ContentUnit,
        reason: String,
        decision: Option<Decision>,
    ) -> Result<Transition> {
        let t = self.archive(unit, reason.clone(), decision).await?;
        Err(GateError::PolicyRejection {
            reason,
            audit_event: t.audit_event,
        })
    }

    async fn route_rewrite(
        &self,
        unit: &mut ContentUnit,
        gate: GateKind,
        back_to: UnitState,
        reason: String,
        decision: Option<Decision>,
    ) -> Result<Transition> {
        let count = unit.counters.increment(gate);
        METRICS.inc_rewrites();
        if let Some(d) = decision {
            unit.last_decision = Some(d);
        }
        if let Some(t) = self.enforce_ceiling(unit, gate, Some(&reason)).await? {
            return Ok(t);
        }
        self.transition(
            unit,
            back_to,
            Some(Verdict::Rewrite),
            format!("{gate} rewrite {count}/{}: {reason}", self.config.max_rewrite_loops),
            None,
        )
        .await
    }

    /// Force REJECT once a gate's rewrite counter is above the maximum.
    /// `Ok(None)` when under the ceiling.
    async fn enforce_ceiling(
        &self,
        unit: &mut ContentUnit,
        gate: GateKind,
        gate_reason: Option<&str>,
    ) -> Result<Option<Transition>> {
        let count = unit.counters.get(gate);
        let max = self.config.max_rewrite_loops;
        if count <= max {
            return Ok(None);
        }

        obs::emit_rewrite_ceiling(&unit.unit_id, gate, count, max);
        warn!(gate = %gate, count, max, "rewrite ceiling exceeded, forcing reject");
        let mut reason = format!("{gate} rewrite limit exceeded ({count} > {max})");
        if let Some(r) = gate_reason {
            reason.push_str(&format!("; last verdict REWRITE: {r}"));
        }
        let forced = Decision::new(
            gate,
            &unit.unit_id,
            Verdict::Reject,
            reason.clone(),
            digest_of(&unit.counters)?,
            self.audit.clock().now(),
        );
        self.record_decision(&unit.unit_id, &forced).await?;
        self.reject(unit, reason, Some(forced)).await.map(Some)
    }
}

/// Rewrite one usage context per a rights directive.
fn apply_directive(contexts: &mut [UsageContext], rewrite: &PendingRewrite) -> Result<()> {
    let Some(ctx) = contexts
        .iter_mut()
        .find(|c| c.reference_id == rewrite.reference_id)
    else {
        return Err(GateError::InvalidTransition {
            unit_id: String::new(),
            detail: format!("no usage context for reference {}", rewrite.reference_id),
        });
    };
    match &rewrite.directive {
        RewriteDirective::StripElements { elements } => {
            ctx.text = strip_elements(&ctx.text, elements);
            ctx.revisions.push(format!("strip: {}", elements.join(", ")));
        }
        RewriteDirective::ReframeAsCommentary => {
            ctx.text = reframe_as_commentary(&ctx.text);
            ctx.revisions.push("reframe_as_commentary".to_string());
        }
        RewriteDirective::Regenerate { notes } => {
            ctx.revisions.push(format!("regenerate: {}", notes.join("; ")));
        }
    }
    Ok(())
}
