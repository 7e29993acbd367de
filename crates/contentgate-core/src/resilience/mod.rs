//! Resilience layer: guarded outbound publishing.
//!
//! Order of checks for every publish call:
//!
//! 1. duplicate index (exact content hash per destination)
//! 2. auth lockout
//! 3. circuit breaker
//! 4. rate limiter
//! 5. the publisher itself, with bounded exponential backoff on transient
//!    errors
//!
//! Every attempt, whatever the outcome, is audited and written to the
//! publish ledger.

mod breaker;
mod dedup;
mod rate_limit;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use contentgate_state::{ContentDigest, PublishLedger, PublishOutcome, PublishRecord};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

pub use breaker::{BreakerState, CircuitBreakers, CircuitState};
pub use dedup::DuplicateIndex;
pub use rate_limit::RateLimiter;

use crate::audit::{AuditEventId, AuditTrail, NewAuditEvent};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::domain::{ContentPackage, GateError, Result};
use crate::incident::{IncidentKind, IncidentLog};
use crate::metrics::METRICS;
use crate::publisher::{Capability, PublishErrorKind, Publisher, RemoteStatus};

/// One outbound publish attempt, as recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAttempt {
    pub destination: String,
    pub content_hash: ContentDigest,
    pub outcome: PublishOutcome,
    pub external_id: Option<String>,
    pub reason: String,
    /// Set for queued and rate-limited attempts
    pub retry_after: Option<DateTime<Utc>>,
    pub attempted_at: DateTime<Utc>,
    pub audit_event: AuditEventId,
}

struct Draft {
    outcome: PublishOutcome,
    external_id: Option<String>,
    reason: String,
    retry_after: Option<DateTime<Utc>>,
}

impl Draft {
    fn new(outcome: PublishOutcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            external_id: None,
            reason: reason.into(),
            retry_after: None,
        }
    }

    fn retry_after(mut self, at: DateTime<Utc>) -> Self {
        self.retry_after = Some(at);
        self
    }
}

pub struct ResilienceLayer {
    retry: RetryPolicy,
    publishers: HashMap<String, Arc<dyn Publisher>>,
    breakers: CircuitBreakers,
    limiter: RateLimiter,
    index: Arc<DuplicateIndex>,
    ledger: Arc<dyn PublishLedger>,
    audit: Arc<AuditTrail>,
    incidents: Arc<IncidentLog>,
    /// destination -> auth failure message
    locked: Mutex<HashMap<String, String>>,
    history: Mutex<Vec<PublishAttempt>>,
}

impl ResilienceLayer {
    pub fn new(
        config: &PipelineConfig,
        index: Arc<DuplicateIndex>,
        ledger: Arc<dyn PublishLedger>,
        audit: Arc<AuditTrail>,
        incidents: Arc<IncidentLog>,
    ) -> Self {
        Self {
            retry: config.retry,
            publishers: HashMap::new(),
            breakers: CircuitBreakers::new(
                config.breaker_failure_threshold,
                config.breaker_cooldown(),
            ),
            limiter: RateLimiter::new(config.rate_limits.clone(), config.default_rate_limit),
            index,
            ledger,
            audit,
            incidents,
            locked: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers
            .insert(publisher.destination().to_string(), publisher);
        self
    }

    /// Load every previously published hash from the ledger into the
    /// duplicate index.
    pub async fn hydrate(&self) -> Result<usize> {
        let published = self.ledger.published_hashes().await?;
        let added = self.index.hydrate(published);
        info!(added, "duplicate index hydrated from publish ledger");
        Ok(added)
    }

    pub fn index(&self) -> &Arc<DuplicateIndex> {
        &self.index
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn breaker_state(&self, destination: &str) -> CircuitState {
        self.breakers.state(destination, self.now())
    }

    pub fn is_locked(&self, destination: &str) -> bool {
        self.locked_reason(destination).is_some()
    }

    fn locked_reason(&self, destination: &str) -> Option<String> {
        self.locked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
            .cloned()
    }

    /// Lift an auth lockout once credentials are fixed.
    pub fn reset_auth(&self, destination: &str) {
        self.locked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(destination);
        info!(destination, "auth lockout lifted");
    }

    pub fn history(&self) -> Vec<PublishAttempt> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.audit.clock().now()
    }

    /// Attempt to publish `package` for `unit_id`.
    ///
    /// `Ok` covers every outcome the caller handles by state: published,
    /// queued, rate limited, duplicate. Policy and auth failures and
    /// exhausted retries are errors.
    #[instrument(skip(self, package), fields(destination = %package.destination))]
    pub async fn publish(&self, unit_id: &str, package: &ContentPackage) -> Result<PublishAttempt> {
        let dest = package.destination.as_str();
        let hash = package.content_hash()?;

        if !self.index.reserve(dest, &hash) {
            let draft = Draft::new(
                PublishOutcome::Rejected,
                format!("duplicate content hash {} for {dest}", hash.short()),
            );
            return self.finish(unit_id, dest, &hash, draft).await;
        }

        let result = self.guarded_publish(unit_id, package, dest, &hash).await;
        match &result {
            Ok(a) if a.outcome == PublishOutcome::Published => {}
            _ => self.index.release(dest, &hash),
        }
        result
    }

    async fn guarded_publish(
        &self,
        unit_id: &str,
        package: &ContentPackage,
        dest: &str,
        hash: &ContentDigest,
    ) -> Result<PublishAttempt> {
        let Some(publisher) = self.publishers.get(dest).cloned() else {
            let draft = Draft::new(
                PublishOutcome::Rejected,
                format!("no publisher registered for {dest}"),
            );
            self.finish(unit_id, dest, hash, draft).await?;
            return Err(GateError::InvalidConfig(format!(
                "no publisher registered for {dest}"
            )));
        };

        if let Some(message) = self.locked_reason(dest) {
            let draft = Draft::new(
                PublishOutcome::AuthFailed,
                format!("destination locked after auth failure: {message}"),
            );
            self.finish(unit_id, dest, hash, draft).await?;
            return Err(GateError::AuthFailure {
                destination: dest.to_string(),
                message,
            });
        }

        if let Err(at) = self.breakers.try_acquire(dest, self.now()) {
            let draft = Draft::new(PublishOutcome::Queued, "circuit open").retry_after(at);
            return self.finish(unit_id, dest, hash, draft).await;
        }

        if let Err(at) = self.limiter.try_acquire(dest, self.now()) {
            self.breakers.record_neutral(dest, self.now());
            let draft =
                Draft::new(PublishOutcome::RateLimited, "over publish budget").retry_after(at);
            return self.finish(unit_id, dest, hash, draft).await;
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            METRICS.inc_publish_attempts();
            let err = match publisher.publish(package).await {
                Ok(external_id) => {
                    self.breakers.record_success(dest, self.now());
                    self.index.commit(dest, hash);
                    let mut draft = Draft::new(PublishOutcome::Published, "published");
                    draft.external_id = Some(external_id);
                    return self.finish(unit_id, dest, hash, draft).await;
                }
                Err(e) => e,
            };

            match &err.kind {
                PublishErrorKind::Transient => {
                    let now = self.now();
                    self.breakers.record_failure(dest, now);
                    let exhausted = attempts >= self.retry.max_attempts
                        || self.breakers.state(dest, now) != CircuitState::Closed;
                    if exhausted {
                        warn!(attempts, error = %err, "transient failures exhausted retries");
                        let draft = Draft::new(
                            PublishOutcome::Queued,
                            format!("transient failure after {attempts} attempts: {}", err.message),
                        );
                        self.finish(unit_id, dest, hash, draft).await?;
                        return Err(GateError::TransientFailure {
                            destination: dest.to_string(),
                            attempts,
                            message: err.message,
                        });
                    }
                    self.audit
                        .append(
                            NewAuditEvent::new("resilience", "publish_retry", unit_id)
                                .input(hash.clone())
                                .decision("transient_failure")
                                .reason(format!("attempt {attempts}: {}", err.message))
                                .tag("publish")
                                .tag(dest),
                        )
                        .await?;
                    let delay = self.retry.delay_for(attempts - 1);
                    warn!(attempts, delay_ms = delay.as_millis() as u64, error = %err, "retrying publish");
                    tokio::time::sleep(delay).await;
                }
                PublishErrorKind::Auth => {
                    self.breakers.record_neutral(dest, self.now());
                    self.locked
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(dest.to_string(), err.message.clone());
                    let draft = Draft::new(PublishOutcome::AuthFailed, err.to_string());
                    self.finish(unit_id, dest, hash, draft).await?;
                    self.incidents
                        .raise(
                            IncidentKind::AuthFailure,
                            Some(dest),
                            format!("credentials rejected: {}", err.message),
                            unit_id,
                        )
                        .await;
                    return Err(GateError::AuthFailure {
                        destination: dest.to_string(),
                        message: err.message,
                    });
                }
                PublishErrorKind::RateLimit { retry_after } => {
                    let now = self.now();
                    self.breakers.record_neutral(dest, now);
                    let until = now + (*retry_after).unwrap_or_else(|| self.retry_fallback());
                    self.limiter.hold(dest, until);
                    let draft = Draft::new(PublishOutcome::RateLimited, err.to_string())
                        .retry_after(until);
                    return self.finish(unit_id, dest, hash, draft).await;
                }
                PublishErrorKind::Validation | PublishErrorKind::Policy => {
                    self.breakers.record_neutral(dest, self.now());
                    let draft = Draft::new(PublishOutcome::Rejected, err.to_string());
                    let attempt = self.finish(unit_id, dest, hash, draft).await?;
                    return Err(GateError::PolicyRejection {
                        reason: format!("{dest} refused the package: {err}"),
                        audit_event: attempt.audit_event,
                    });
                }
            }
        }
    }

    fn retry_fallback(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.retry.max_delay_ms as i64)
    }

    async fn finish(
        &self,
        unit_id: &str,
        dest: &str,
        hash: &ContentDigest,
        draft: Draft,
    ) -> Result<PublishAttempt> {
        let now = self.now();
        let event = NewAuditEvent::new("resilience", "publish_attempt", unit_id)
            .input(hash.clone())
            .decision(draft.outcome)
            .reason(draft.reason.clone())
            .tag("publish")
            .tag(dest);
        let audit_event = self.audit.append(event).await?;

        let attempt = PublishAttempt {
            destination: dest.to_string(),
            content_hash: hash.clone(),
            outcome: draft.outcome,
            external_id: draft.external_id,
            reason: draft.reason,
            retry_after: draft.retry_after,
            attempted_at: now,
            audit_event,
        };

        self.ledger
            .record(PublishRecord {
                destination: attempt.destination.clone(),
                content_hash: attempt.content_hash.clone(),
                outcome: attempt.outcome,
                external_id: attempt.external_id.clone(),
                unit_id: unit_id.to_string(),
                reason: attempt.reason.clone(),
                retry_after: attempt.retry_after,
                recorded_at: now,
            })
            .await?;

        info!(
            event = "publish.attempt",
            unit_id,
            destination = dest,
            outcome = %attempt.outcome,
            audit_event = %audit_event,
        );
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(attempt.clone());
        Ok(attempt)
    }

    /// Ask the destination where a published post stands.
    pub async fn fetch_status(&self, destination: &str, external_id: &str) -> Result<RemoteStatus> {
        let publisher = self.publishers.get(destination).ok_or_else(|| {
            GateError::InvalidConfig(format!("no publisher registered for {destination}"))
        })?;
        if !publisher.supports(Capability::FetchStatus) {
            return Err(GateError::InvalidConfig(format!(
                "{destination} does not support status lookups"
            )));
        }
        publisher
            .fetch_status(external_id)
            .await
            .map_err(|e| GateError::StageFailed {
                stage: format!("fetch_status:{destination}"),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, AssetKind, CaptionVariant, ManualClock};
    use crate::fakes::ScriptedPublisher;
    use crate::publisher::PublishError;
    use contentgate_state::fakes::{MemoryAuditStore, MemoryPublishLedger};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn layer(publisher: Arc<ScriptedPublisher>) -> ResilienceLayer {
        let mut config = PipelineConfig::default();
        config
            .rate_limits
            .insert("tiktok".to_string(), crate::config::RateLimit::new(100, 86_400, 0));
        let audit = Arc::new(AuditTrail::new(
            Arc::new(MemoryAuditStore::new()),
            Arc::new(ManualClock::new(now())),
            config.clock_skew_tolerance(),
        ));
        let incidents = Arc::new(IncidentLog::new(Arc::clone(&audit)));
        ResilienceLayer::new(
            &config,
            Arc::new(DuplicateIndex::new()),
            Arc::new(MemoryPublishLedger::new()),
            audit,
            incidents,
        )
        .with_publisher(publisher)
    }

    fn package(hook: &str) -> ContentPackage {
        ContentPackage {
            package_id: "pkg".to_string(),
            unit_id: "u1".to_string(),
            destination: "tiktok".to_string(),
            hook: hook.to_string(),
            captions: vec![CaptionVariant::new("tiktok", "desk lamp #ad")],
            assets: vec![Asset {
                kind: AssetKind::Video,
                uri: "s3://v.mp4".to_string(),
            }],
            reference_ids: vec![],
        }
    }

    #[tokio::test]
    async fn duplicate_is_blocked_before_the_breaker() {
        let publisher = Arc::new(ScriptedPublisher::new("tiktok"));
        let layer = layer(publisher.clone());
        let p = package("3 desk upgrades");

        let first = layer.publish("u1", &p).await.unwrap();
        assert_eq!(first.outcome, PublishOutcome::Published);

        for _ in 0..3 {
            layer.breakers().record_failure("tiktok", now());
        }
        assert_eq!(layer.breaker_state("tiktok"), CircuitState::Open);

        let second = layer.publish("u2", &p).await.unwrap();
        assert_eq!(second.outcome, PublishOutcome::Rejected);
        assert!(second.reason.starts_with("duplicate content hash"));
        assert_eq!(second.retry_after, None);
        assert_eq!(publisher.calls(), 1);
    }

    #[tokio::test]
    async fn failed_publish_releases_the_hash() {
        let publisher = Arc::new(
            ScriptedPublisher::new("tiktok").then_err(PublishError::validation("caption too long")),
        );
        let layer = layer(publisher.clone());
        let p = package("3 desk upgrades");

        let err = layer.publish("u1", &p).await.unwrap_err();
        assert!(matches!(err, GateError::PolicyRejection { .. }));
        assert_eq!(layer.breaker_state("tiktok"), CircuitState::Closed);

        let again = layer.publish("u1", &p).await.unwrap();
        assert_eq!(again.outcome, PublishOutcome::Published);
        assert_eq!(layer.history().len(), 2);
    }
}
