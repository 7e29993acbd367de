//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. after a batch of units is driven).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    transitions: AtomicU64,
    rewrites: AtomicU64,
    units_archived: AtomicU64,
    units_published: AtomicU64,
    publish_attempts: AtomicU64,
    breaker_trips: AtomicU64,
    audit_events: AtomicU64,
    integrity_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            transitions: AtomicU64::new(0),
            rewrites: AtomicU64::new(0),
            units_archived: AtomicU64::new(0),
            units_published: AtomicU64::new(0),
            publish_attempts: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
            audit_events: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_transitions(&self) {
        Self::bump(&self.transitions, "transitions");
    }

    pub fn inc_rewrites(&self) {
        Self::bump(&self.rewrites, "rewrites");
    }

    pub fn inc_archived(&self) {
        Self::bump(&self.units_archived, "units_archived");
    }

    pub fn inc_published(&self) {
        Self::bump(&self.units_published, "units_published");
    }

    pub fn inc_publish_attempts(&self) {
        Self::bump(&self.publish_attempts, "publish_attempts");
    }

    pub fn inc_breaker_trips(&self) {
        Self::bump(&self.breaker_trips, "breaker_trips");
    }

    pub fn inc_audit_events(&self) {
        Self::bump(&self.audit_events, "audit_events");
    }

    pub fn inc_integrity_failures(&self) {
        Self::bump(&self.integrity_failures, "integrity_failures");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            transitions = self.transitions(),
            rewrites = self.rewrites(),
            units_archived = self.units_archived(),
            units_published = self.units_published(),
            publish_attempts = self.publish_attempts(),
            breaker_trips = self.breaker_trips(),
            audit_events = self.audit_events(),
            integrity_failures = self.integrity_failures(),
        );
    }

    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    pub fn rewrites(&self) -> u64 {
        self.rewrites.load(Ordering::Relaxed)
    }

    pub fn units_archived(&self) -> u64 {
        self.units_archived.load(Ordering::Relaxed)
    }

    pub fn units_published(&self) -> u64 {
        self.units_published.load(Ordering::Relaxed)
    }

    pub fn publish_attempts(&self) -> u64 {
        self.publish_attempts.load(Ordering::Relaxed)
    }

    pub fn breaker_trips(&self) -> u64 {
        self.breaker_trips.load(Ordering::Relaxed)
    }

    pub fn audit_events(&self) -> u64 {
        self.audit_events.load(Ordering::Relaxed)
    }

    pub fn integrity_failures(&self) -> u64 {
        self.integrity_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for c in [
            &self.transitions,
            &self.rewrites,
            &self.units_archived,
            &self.units_published,
            &self.publish_attempts,
            &self.breaker_trips,
            &self.audit_events,
            &self.integrity_failures,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
