//! Token-bucket rate limiter with minimum call spacing.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::RateLimit;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
    last_call: Option<DateTime<Utc>>,
    /// Remote asked us to back off until this instant
    hold_until: Option<DateTime<Utc>>,
}

/// Per-destination budget. Over-budget calls are refused with the instant
/// the next call fits, never silently dropped.
#[derive(Debug)]
pub struct RateLimiter {
    limits: BTreeMap<String, RateLimit>,
    fallback: RateLimit,
    buckets: Mutex<HashMap<String, Bucket>>,
}

fn secs(d: f64) -> Duration {
    Duration::milliseconds((d * 1000.0).ceil() as i64)
}

impl RateLimiter {
    pub fn new(limits: BTreeMap<String, RateLimit>, fallback: RateLimit) -> Self {
        Self {
            limits,
            fallback,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit_for(&self, destination: &str) -> RateLimit {
        self.limits.get(destination).copied().unwrap_or(self.fallback)
    }

    /// Take one token. `Err(at)` is the earliest instant the call fits.
    pub fn try_acquire(&self, destination: &str, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        let limit = self.limit_for(destination);
        let capacity = f64::from(limit.max_requests.max(1));
        let per_token = limit.window_secs.max(1) as f64 / capacity;

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(destination.to_string())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: now,
                last_call: None,
                hold_until: None,
            });

        if let Some(until) = bucket.hold_until {
            if now < until {
                return Err(until);
            }
            bucket.hold_until = None;
        }

        let elapsed = (now - bucket.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed / per_token).min(capacity);
        bucket.last_refill = now;

        if let Some(last) = bucket.last_call {
            let spacing = Duration::seconds(limit.min_interval_secs as i64);
            if now < last + spacing {
                debug!(destination, "minimum spacing not met");
                return Err(last + spacing);
            }
        }

        if bucket.tokens < 1.0 {
            let wait = (1.0 - bucket.tokens) * per_token;
            debug!(destination, wait_secs = wait, "token bucket empty");
            return Err(now + secs(wait));
        }

        bucket.tokens -= 1.0;
        bucket.last_call = Some(now);
        Ok(())
    }

    /// Refuse every call until `until`, after a remote rate-limit response.
    pub fn hold(&self, destination: &str, until: DateTime<Utc>) {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bucket) = buckets.get_mut(destination) {
            bucket.hold_until = Some(bucket.hold_until.map_or(until, |h| h.max(until)));
        }
    }
}
