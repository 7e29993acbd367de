//! contentgate core library
//!
//! Drives content units through rights evaluation, generation, quality
//! gating and guarded publishing. Every decision lands in a hash-chained
//! audit trail; nothing is published without an APPROVE from the quality
//! gate on the current package.

pub mod audit;
pub mod config;
pub mod domain;
pub mod executor;
pub mod fakes;
pub mod generation;
pub mod incident;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod publisher;
pub mod quality;
pub mod resilience;
pub mod rights;
pub mod service;
pub mod telemetry;

pub use audit::{
    read_audit_export, write_audit_export, AuditEventId, AuditExport, AuditTrail, ChainReport,
    NewAuditEvent,
};
pub use config::{PipelineConfig, RateLimit, RetryPolicy};
pub use domain::{
    Asset, AssetKind, CaptionVariant, Clock, ContentBrief, ContentPackage, ContentUnit, Decision,
    GateError, GateKind, LicenseProof, LicenseStatus, ManualClock, Reference, Result,
    RewriteDirective, SystemClock, UnitState, UsageContext, UsageTag, Verdict,
};
pub use executor::{
    CancelToken, ConcurrencyExecutor, PipelineResult, RunStatus, Stage, StageGraph, StageResult,
    StageStatus,
};
pub use generation::{GenerationRequest, Generator};
pub use incident::{Incident, IncidentKind, IncidentLog};
pub use orchestrator::{Orchestrator, Transition};
pub use publisher::{Capability, PublishError, PublishErrorKind, Publisher, RemoteStatus};
pub use quality::{QualityContext, QualityGate, QualityReport};
pub use resilience::{CircuitState, DuplicateIndex, PublishAttempt, ResilienceLayer};
pub use rights::{RightsEvaluator, RightsRegistry};
pub use service::{ContentGate, ContentGateBuilder, Identity, Role, UnitStatus};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
