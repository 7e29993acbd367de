//! Per-destination circuit breakers.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::METRICS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused until the cooldown elapses.
    Open,
    /// Exactly one trial call is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// State of one destination's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition: DateTime<Utc>,
    pub cooldown: Duration,
    /// The single half-open trial has been handed out
    pub trial_in_flight: bool,
}

impl BreakerState {
    fn new(cooldown: Duration, now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_transition: now,
            cooldown,
            trial_in_flight: false,
        }
    }

    fn transition(&mut self, to: CircuitState, now: DateTime<Utc>) {
        self.state = to;
        self.last_transition = now;
        self.trial_in_flight = false;
    }

    /// Open breakers whose cooldown elapsed become half-open.
    fn refresh(&mut self, now: DateTime<Utc>) {
        if self.state == CircuitState::Open && now >= self.reopens_at() {
            self.transition(CircuitState::HalfOpen, now);
        }
    }

    pub fn reopens_at(&self) -> DateTime<Utc> {
        self.last_transition + self.cooldown
    }
}

/// Breakers for every destination, created lazily on first use and kept
/// for the life of the process. All mutation happens under one lock.
#[derive(Debug)]
pub struct CircuitBreakers {
    failure_threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreakers {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn with_state<T>(
        &self,
        destination: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut BreakerState) -> T,
    ) -> T {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = states
            .entry(destination.to_string())
            .or_insert_with(|| BreakerState::new(self.cooldown, now));
        entry.refresh(now);
        f(entry)
    }

    /// Ask to make a call. `Err(at)` when refused, with the earliest instant
    /// a retry can succeed.
    pub fn try_acquire(&self, destination: &str, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        self.with_state(destination, now, |b| match b.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(b.reopens_at()),
            CircuitState::HalfOpen if b.trial_in_flight => Err(now + b.cooldown),
            CircuitState::HalfOpen => {
                b.trial_in_flight = true;
                info!(destination, "circuit half-open, allowing trial call");
                Ok(())
            }
        })
    }

    pub fn record_success(&self, destination: &str, now: DateTime<Utc>) {
        self.with_state(destination, now, |b| {
            b.consecutive_failures = 0;
            if b.state == CircuitState::HalfOpen {
                info!(destination, "circuit closing after successful trial");
                b.transition(CircuitState::Closed, now);
            }
        })
    }

    pub fn record_failure(&self, destination: &str, now: DateTime<Utc>) {
        let threshold = self.failure_threshold;
        self.with_state(destination, now, |b| match b.state {
            CircuitState::Closed => {
                b.consecutive_failures += 1;
                if b.consecutive_failures >= threshold {
                    warn!(
                        destination,
                        failures = b.consecutive_failures,
                        "circuit opening due to failures"
                    );
                    b.transition(CircuitState::Open, now);
                    METRICS.inc_breaker_trips();
                }
            }
            CircuitState::HalfOpen => {
                b.consecutive_failures += 1;
                warn!(destination, "circuit re-opening after failed trial");
                b.transition(CircuitState::Open, now);
                METRICS.inc_breaker_trips();
            }
            CircuitState::Open => {}
        })
    }

    /// The call ended without saying anything about endpoint health
    /// (refused locally, or answered with a client-side error). A held
    /// half-open trial is handed back.
    pub fn record_neutral(&self, destination: &str, now: DateTime<Utc>) {
        self.with_state(destination, now, |b| {
            b.trial_in_flight = false;
        })
    }

    pub fn state(&self, destination: &str, now: DateTime<Utc>) -> CircuitState {
        self.with_state(destination, now, |b| b.state)
    }

    pub fn snapshot(&self, destination: &str, now: DateTime<Utc>) -> BreakerState {
        self.with_state(destination, now, |b| b.clone())
    }

    pub fn reset(&self, destination: &str, now: DateTime<Utc>) {
        self.with_state(destination, now, |b| {
            b.consecutive_failures = 0;
            b.transition(CircuitState::Closed, now);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn opens_after_threshold_then_one_trial_closes() {
        let b = CircuitBreakers::new(3, Duration::minutes(15));
        b.record_failure("x", t0());
        b.record_failure("x", t0());
        assert_eq!(b.state("x", t0()), CircuitState::Closed);
        b.record_failure("x", t0());
        assert_eq!(b.state("x", t0()), CircuitState::Open);

        let later = t0() + Duration::minutes(15);
        assert_eq!(b.state("x", later), CircuitState::HalfOpen);
        assert!(b.try_acquire("x", later).is_ok());
        // only one trial
        assert!(b.try_acquire("x", later).is_err());

        b.record_success("x", later);
        assert_eq!(b.state("x", later), CircuitState::Closed);
        assert!(b.try_acquire("x", later).is_ok());
    }

    #[test]
    fn success_in_closed_resets_failures() {
        let b = CircuitBreakers::new(3, Duration::minutes(15));
        b.record_failure("x", t0());
        b.record_failure("x", t0());
        b.record_success("x", t0());
        b.record_failure("x", t0());
        assert_eq!(b.state("x", t0()), CircuitState::Closed);
        assert_eq!(b.snapshot("x", t0()).consecutive_failures, 1);
    }

    #[test]
    fn open_refuses_with_reopen_instant() {
        let b = CircuitBreakers::new(1, Duration::minutes(15));
        b.record_failure("x", t0());
        let at = b.try_acquire("x", t0() + Duration::minutes(1)).unwrap_err();
        assert_eq!(at, t0() + Duration::minutes(15));
    }

    #[test]
    fn failed_trial_reopens() {
        let b = CircuitBreakers::new(1, Duration::minutes(15));
        b.record_failure("x", t0());
        let later = t0() + Duration::minutes(15);
        assert!(b.try_acquire("x", later).is_ok());
        b.record_failure("x", later);
        assert_eq!(b.state("x", later), CircuitState::Open);
        assert!(b.try_acquire("x", later).is_err());
    }

    #[test]
    fn neutral_outcome_returns_the_trial() {
        let b = CircuitBreakers::new(1, Duration::minutes(15));
        b.record_failure("x", t0());
        let later = t0() + Duration::minutes(16);
        assert!(b.try_acquire("x", later).is_ok());
        assert!(b.try_acquire("x", later).is_err());
        b.record_neutral("x", later);
        assert_eq!(b.state("x", later), CircuitState::HalfOpen);
        assert!(b.try_acquire("x", later).is_ok());
    }

    #[test]
    fn destinations_are_independent() {
        let b = CircuitBreakers::new(1, Duration::minutes(15));
        b.record_failure("tiktok", t0());
        assert_eq!(b.state("tiktok", t0()), CircuitState::Open);
        assert_eq!(b.state("instagram", t0()), CircuitState::Closed);
    }
}
