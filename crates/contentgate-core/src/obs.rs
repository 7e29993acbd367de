//! Structured lifecycle events for content units.
//!
//! - `UnitSpan`: RAII guard entering a unit-scoped span
//! - `emit_*`: one `info!`/`warn!` per lifecycle event, keyed by `event`

use tracing::{info, warn};

use crate::domain::{GateKind, UnitState, Verdict};

/// RAII guard that enters a span tagged with the unit id.
///
/// ```ignore
/// let _span = UnitSpan::enter("unit-123");
/// ```
pub struct UnitSpan {
    _span: tracing::span::EnteredSpan,
}

impl UnitSpan {
    pub fn enter(unit_id: &str) -> Self {
        let span = tracing::info_span!("contentgate.unit", unit_id = %unit_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_unit_submitted(unit_id: &str, tenant_id: &str, references: usize) {
    info!(event = "unit.submitted", unit_id = %unit_id, tenant_id = %tenant_id, references);
}

pub fn emit_transition(unit_id: &str, from: UnitState, to: UnitState) {
    info!(event = "unit.transition", unit_id = %unit_id, from = %from, to = %to);
}

pub fn emit_gate_decision(unit_id: &str, gate: GateKind, verdict: Verdict, risk: Option<u8>) {
    info!(
        event = "gate.decision",
        unit_id = %unit_id,
        gate = %gate,
        verdict = %verdict,
        risk_score = risk.map(i64::from).unwrap_or(-1),
    );
}

pub fn emit_rewrite_ceiling(unit_id: &str, gate: GateKind, count: u32, max: u32) {
    warn!(event = "gate.rewrite_ceiling", unit_id = %unit_id, gate = %gate, count, max);
}

pub fn emit_unit_archived(unit_id: &str, reason: &str) {
    info!(event = "unit.archived", unit_id = %unit_id, reason = %reason);
}

pub fn emit_unit_published(unit_id: &str, destination: &str, external_id: &str) {
    info!(
        event = "unit.published",
        unit_id = %unit_id,
        destination = %destination,
        external_id = %external_id,
    );
}

pub fn emit_override(unit_id: &str, actor: &str, verdict: Verdict, reason_code: &str) {
    warn!(
        event = "unit.override",
        unit_id = %unit_id,
        actor = %actor,
        verdict = %verdict,
        reason_code = %reason_code,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_span_enter() {
        let _span = UnitSpan::enter("unit-1");
        emit_transition("unit-1", UnitState::Intake, UnitState::ReferenceMapped);
    }
}
