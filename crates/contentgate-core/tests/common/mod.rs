//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use contentgate_core::fakes::{ScriptedPublisher, StaticGenerator};
use contentgate_core::{
    ContentBrief, ContentGate, LicenseProof, LicenseStatus, ManualClock, PipelineConfig,
    Reference, RightsRegistry,
};
use contentgate_state::fakes::{MemoryAuditStore, MemoryPublishLedger, MemoryUnitStore};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn brief(direction: &str) -> ContentBrief {
    ContentBrief {
        tenant_id: "tenant-a".to_string(),
        destination: "tiktok".to_string(),
        direction: direction.to_string(),
        product: "desk lamp".to_string(),
    }
}

pub fn style_ref(id: &str) -> Reference {
    Reference::new(id, "Ukiyo-e woodblock prints", "style-only")
}

pub fn licensed_ref(id: &str) -> Reference {
    Reference::new(id, "Studio lamp photo set", "licensed").with_license(
        LicenseProof::new(format!("LIC-{id}"), LicenseStatus::Active)
            .with_scopes(["commercial", "social"])
            .with_proof_uri(format!("s3://licenses/{id}.pdf")),
    )
}

pub struct Harness {
    pub gate: ContentGate,
    pub clock: Arc<ManualClock>,
    pub audit_store: Arc<MemoryAuditStore>,
    pub unit_store: Arc<MemoryUnitStore>,
    pub ledger: Arc<MemoryPublishLedger>,
    pub generator: Arc<StaticGenerator>,
    pub publisher: Arc<ScriptedPublisher>,
}

pub struct HarnessBuilder {
    config: PipelineConfig,
    registry: RightsRegistry,
    generator: StaticGenerator,
    publisher: ScriptedPublisher,
    ledger: Arc<MemoryPublishLedger>,
}

impl HarnessBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: RightsRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn generator(mut self, generator: StaticGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn publisher(mut self, publisher: ScriptedPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn ledger(mut self, ledger: Arc<MemoryPublishLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub async fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let audit_store = Arc::new(MemoryAuditStore::new());
        let unit_store = Arc::new(MemoryUnitStore::new());
        let generator = Arc::new(self.generator);
        let publisher = Arc::new(self.publisher);

        let gate = ContentGate::builder()
            .config(self.config)
            .registry(self.registry)
            .clock(clock.clone())
            .audit_store(audit_store.clone())
            .unit_store(unit_store.clone())
            .ledger(self.ledger.clone())
            .generator(generator.clone())
            .publisher(publisher.clone())
            .build()
            .await
            .unwrap();

        Harness {
            gate,
            clock,
            audit_store,
            unit_store,
            ledger: self.ledger,
            generator,
            publisher,
        }
    }
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        config: PipelineConfig::default(),
        registry: RightsRegistry::with_known_trademarks(),
        generator: StaticGenerator::new(),
        publisher: ScriptedPublisher::new("tiktok"),
        ledger: Arc::new(MemoryPublishLedger::new()),
    }
}

/// Advance `unit_id` until it reaches `state`, failing on any error.
pub async fn advance_to(gate: &ContentGate, unit_id: &str, state: contentgate_core::UnitState) {
    for _ in 0..16 {
        if gate.get_status(unit_id).await.unwrap().state == state {
            return;
        }
        gate.advance(unit_id).await.unwrap();
    }
    panic!("unit {unit_id} never reached {state}");
}

/// Config without per-destination spacing, for tests that publish often.
pub fn relaxed_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config
        .rate_limits
        .insert("tiktok".to_string(), contentgate_core::RateLimit::new(100, 86_400, 0));
    config
}
