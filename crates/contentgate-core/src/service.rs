//! `ContentGate`: the service facade.
//!
//! Owns the shared collaborators, persists every unit after each step and
//! serializes work on a single unit behind its own lock. Independent units
//! advance concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use contentgate_state::fakes::{MemoryAuditStore, MemoryPublishLedger, MemoryUnitStore};
use contentgate_state::{AuditStore, PublishLedger, StorageError, UnitStore};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::audit::{AuditTrail, ChainReport, NewAuditEvent};
use crate::config::PipelineConfig;
use crate::domain::digest::digest_of;
use crate::domain::{
    Clock, ContentBrief, ContentUnit, GateError, Reference, Result, RewriteCounters, SystemClock,
    UnitState, Verdict,
};
use crate::executor::ConcurrencyExecutor;
use crate::generation::Generator;
use crate::incident::{IncidentKind, IncidentLog};
use crate::obs;
use crate::orchestrator::{Orchestrator, Transition};
use crate::publisher::Publisher;
use crate::quality::QualityGate;
use crate::resilience::{DuplicateIndex, ResilienceLayer};
use crate::rights::{RightsEvaluator, RightsRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    /// May override verdicts and grant elevated review
    Elevated,
}

/// Who is calling. Authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub actor: String,
    pub role: Role,
}

impl Identity {
    pub fn operator(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            role: Role::Operator,
        }
    }

    pub fn elevated(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            role: Role::Elevated,
        }
    }
}

/// Externally visible summary of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit_id: String,
    pub state: UnitState,
    pub terminal_reason: Option<String>,
    pub counters: RewriteCounters,
    pub last_verdict: Option<Verdict>,
    pub retry_after: Option<DateTime<Utc>>,
}

impl From<&ContentUnit> for UnitStatus {
    fn from(unit: &ContentUnit) -> Self {
        Self {
            unit_id: unit.unit_id.clone(),
            state: unit.state,
            terminal_reason: unit.terminal.as_ref().map(|t| t.reason.clone()),
            counters: unit.counters,
            last_verdict: unit.last_decision.as_ref().map(|d| d.verdict),
            retry_after: unit.retry_after,
        }
    }
}

pub struct ContentGateBuilder {
    config: PipelineConfig,
    registry: RightsRegistry,
    clock: Arc<dyn Clock>,
    audit_store: Arc<dyn AuditStore>,
    unit_store: Arc<dyn UnitStore>,
    ledger: Arc<dyn PublishLedger>,
    generator: Option<Arc<dyn Generator>>,
    publishers: Vec<Arc<dyn Publisher>>,
}

impl Default for ContentGateBuilder {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            registry: RightsRegistry::with_known_trademarks(),
            clock: Arc::new(SystemClock),
            audit_store: Arc::new(MemoryAuditStore::new()),
            unit_store: Arc::new(MemoryUnitStore::new()),
            ledger: Arc::new(MemoryPublishLedger::new()),
            generator: None,
            publishers: Vec::new(),
        }
    }
}

impl ContentGateBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: RightsRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = store;
        self
    }

    pub fn unit_store(mut self, store: Arc<dyn UnitStore>) -> Self {
        self.unit_store = store;
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn PublishLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Validate the config, wire the components and rebuild the duplicate
    /// index from the publish ledger.
    pub async fn build(self) -> Result<ContentGate> {
        self.config.validate()?;
        let generator = self
            .generator
            .ok_or_else(|| GateError::InvalidConfig("a generator is required".to_string()))?;

        let audit = Arc::new(AuditTrail::new(
            self.audit_store,
            self.clock,
            self.config.clock_skew_tolerance(),
        ));
        let incidents = Arc::new(IncidentLog::new(Arc::clone(&audit)));
        let index = Arc::new(DuplicateIndex::new());

        let mut resilience = ResilienceLayer::new(
            &self.config,
            Arc::clone(&index),
            self.ledger,
            Arc::clone(&audit),
            Arc::clone(&incidents),
        );
        for publisher in self.publishers {
            resilience = resilience.with_publisher(publisher);
        }
        let resilience = Arc::new(resilience);
        resilience.hydrate().await?;

        let orchestrator = Orchestrator::new(
            self.config.clone(),
            RightsEvaluator::new(self.registry, &self.config),
            QualityGate::new(&self.config, index),
            Arc::clone(&resilience),
            ConcurrencyExecutor::from_config(&self.config),
            generator,
            Arc::clone(&audit),
            Arc::clone(&incidents),
        );

        Ok(ContentGate {
            orchestrator,
            audit,
            incidents,
            resilience,
            units: self.unit_store,
            handles: StdMutex::new(HashMap::new()),
        })
    }
}

type UnitHandle = Arc<Mutex<ContentUnit>>;

pub struct ContentGate {
    orchestrator: Orchestrator,
    audit: Arc<AuditTrail>,
    incidents: Arc<IncidentLog>,
    resilience: Arc<ResilienceLayer>,
    units: Arc<dyn UnitStore>,
    /// Live units, one lock each. Terminal units are dropped from here.
    handles: StdMutex<HashMap<String, UnitHandle>>,
}

fn not_found(unit_id: &str, err: StorageError) -> GateError {
    match err {
        StorageError::NotFound { .. } => GateError::UnitNotFound(unit_id.to_string()),
        other => GateError::Storage(other),
    }
}

impl ContentGate {
    pub fn builder() -> ContentGateBuilder {
        ContentGateBuilder::default()
    }

    /// Register a new content unit at `Intake`.
    #[instrument(skip(self, brief, references), fields(tenant_id = %brief.tenant_id))]
    pub async fn submit(&self, brief: ContentBrief, references: Vec<Reference>) -> Result<String> {
        if let Some(reason) = self.audit.halt_reason() {
            let err = GateError::Halted(reason);
            self.audit
                .append(
                    NewAuditEvent::new("service", "submit_refused", "service")
                        .decision(err.class())
                        .reason(err.to_string())
                        .tag(brief.destination.clone()),
                )
                .await?;
            return Err(err);
        }
        let unit = ContentUnit::new(brief, references, self.audit.clock().now());
        let input = digest_of(&serde_json::json!({
            "brief": unit.brief,
            "references": unit.references,
        }))?;
        self.audit
            .append(
                NewAuditEvent::new("service", "submit", &unit.unit_id)
                    .input(input)
                    .reason(format!("{} references", unit.references.len()))
                    .tag(unit.brief.destination.clone()),
            )
            .await?;
        self.units.save(unit.snapshot()?).await?;
        obs::emit_unit_submitted(&unit.unit_id, &unit.tenant_id, unit.references.len());

        let unit_id = unit.unit_id.clone();
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(unit_id.clone(), Arc::new(Mutex::new(unit)));
        Ok(unit_id)
    }

    async fn handle(&self, unit_id: &str) -> Result<UnitHandle> {
        let live = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(unit_id)
            .cloned();
        if let Some(h) = live {
            return Ok(h);
        }
        let snapshot = self
            .units
            .load(unit_id)
            .await
            .map_err(|e| not_found(unit_id, e))?;
        let unit = ContentUnit::from_snapshot(&snapshot)?;
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        // another caller may have loaded it meanwhile
        let h = handles
            .entry(unit_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(unit)));
        Ok(Arc::clone(h))
    }

    async fn persist(&self, unit: &ContentUnit) -> Result<()> {
        self.units.save(unit.snapshot()?).await?;
        if unit.is_terminal() {
            self.handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&unit.unit_id);
        }
        Ok(())
    }

    pub async fn get_status(&self, unit_id: &str) -> Result<UnitStatus> {
        let live = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(unit_id)
            .cloned();
        if let Some(h) = live {
            return Ok(UnitStatus::from(&*h.lock().await));
        }
        let snapshot = self
            .units
            .load(unit_id)
            .await
            .map_err(|e| not_found(unit_id, e))?;
        Ok(UnitStatus::from(&ContentUnit::from_snapshot(&snapshot)?))
    }

    /// Full unit record, including decisions and the package.
    pub async fn get_unit(&self, unit_id: &str) -> Result<ContentUnit> {
        let h = self.handle(unit_id).await?;
        let unit = h.lock().await.clone();
        Ok(unit)
    }

    pub async fn list_units(&self, tenant_id: &str) -> Result<Vec<UnitStatus>> {
        let snapshots = self.units.list_by_tenant(tenant_id).await?;
        snapshots
            .iter()
            .map(|s| ContentUnit::from_snapshot(s).map(|u| UnitStatus::from(&u)))
            .collect()
    }

    /// Apply one transition and persist the unit, whether or not the step
    /// succeeded.
    pub async fn advance(&self, unit_id: &str) -> Result<Transition> {
        let h = self.handle(unit_id).await?;
        let mut unit = h.lock().await;
        let result = self.orchestrator.advance(&mut unit).await;
        self.persist(&unit).await?;
        result
    }

    /// Advance until the unit is terminal or its publish is deferred.
    pub async fn drive(&self, unit_id: &str) -> Result<UnitStatus> {
        loop {
            let t = self.advance(unit_id).await?;
            if t.to.is_terminal() || t.from == t.to {
                break;
            }
        }
        self.get_status(unit_id).await
    }

    /// Drive several units concurrently. Results keep the input order.
    pub async fn drive_all(&self, unit_ids: &[String]) -> Vec<Result<UnitStatus>> {
        join_all(unit_ids.iter().map(|id| self.drive(id))).await
    }

    /// Human override. Only elevated identities may override; a denied
    /// attempt is audited.
    pub async fn override_verdict(
        &self,
        unit_id: &str,
        verdict: Verdict,
        reason_code: &str,
        identity: &Identity,
    ) -> Result<Transition> {
        if identity.role != Role::Elevated {
            warn!(actor = %identity.actor, unit_id, "override denied");
            self.audit
                .append(
                    NewAuditEvent::new(identity.actor.clone(), "override_denied", unit_id)
                        .decision(verdict)
                        .reason(format!("{reason_code}: role {:?} may not override", identity.role))
                        .tag("override"),
                )
                .await?;
            return Err(GateError::Unauthorized(format!(
                "{} may not override verdicts",
                identity.actor
            )));
        }

        let h = self.handle(unit_id).await?;
        let mut unit = h.lock().await;
        let result = self
            .orchestrator
            .apply_override(&mut unit, verdict, reason_code, &identity.actor)
            .await;
        self.persist(&unit).await?;
        result
    }

    /// Let review-band risk pass the quality gate for this unit.
    pub async fn grant_elevated_review(
        &self,
        unit_id: &str,
        reason_code: &str,
        identity: &Identity,
    ) -> Result<Transition> {
        self.override_verdict(unit_id, Verdict::Approve, reason_code, identity)
            .await
    }

    /// Verify the whole audit chain. A break halts the pipeline and raises
    /// an incident; the report says where.
    pub async fn verify_audit(&self) -> Result<ChainReport> {
        let report = self.audit.verify_all().await?;
        if let Some(b) = &report.first_break {
            self.audit.halt_on_break(b);
            self.incidents
                .raise(
                    IncidentKind::ChainIntegrity,
                    None,
                    format!("audit chain broken at seq {}: {}", b.seq, b.detail),
                    "audit",
                )
                .await;
        }
        info!(
            verified = report.verified,
            intact = report.intact(),
            "audit chain verified"
        );
        Ok(report)
    }

    /// Lift an auth lockout. Only elevated identities may do this; the
    /// reset and any denied attempt are audited, and the destination's open
    /// auth incidents are resolved.
    pub async fn reset_auth(&self, destination: &str, identity: &Identity) -> Result<()> {
        if identity.role != Role::Elevated {
            warn!(actor = %identity.actor, destination, "auth reset denied");
            self.audit
                .append(
                    NewAuditEvent::new(identity.actor.clone(), "auth_reset_denied", destination)
                        .decision("unauthorized")
                        .reason(format!("role {:?} may not reset auth", identity.role))
                        .tag("auth"),
                )
                .await?;
            return Err(GateError::Unauthorized(format!(
                "{} may not reset auth lockouts",
                identity.actor
            )));
        }

        let was_locked = self.resilience.is_locked(destination);
        self.audit
            .append(
                NewAuditEvent::new(identity.actor.clone(), "auth_reset", destination)
                    .decision("lifted")
                    .reason(if was_locked {
                        "auth lockout lifted".to_string()
                    } else {
                        "destination was not locked".to_string()
                    })
                    .tag("auth"),
            )
            .await?;
        self.resilience.reset_auth(destination);
        self.incidents
            .resolve(IncidentKind::AuthFailure, Some(destination), &identity.actor)
            .await?;
        Ok(())
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn incidents(&self) -> &Arc<IncidentLog> {
        &self.incidents
    }

    pub fn resilience(&self) -> &Arc<ResilienceLayer> {
        &self.resilience
    }

    pub fn config(&self) -> &PipelineConfig {
        self.orchestrator.config()
    }
}
