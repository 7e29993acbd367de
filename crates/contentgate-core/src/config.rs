//! Pipeline configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! max_rewrite_loops = 3
//! quality_threshold = 60
//!
//! [retry]
//! max_attempts = 3
//!
//! [rate_limits.tiktok]
//! max_requests = 10
//! window_secs = 86400
//! min_interval_secs = 3600
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::error::{GateError, Result};

/// Token-bucket budget for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Bucket capacity; refilled evenly over `window_secs`
    pub max_requests: u32,
    pub window_secs: u64,
    /// Minimum gap between two calls, 0 to disable
    #[serde(default)]
    pub min_interval_secs: u64,
}

impl RateLimit {
    pub const fn new(max_requests: u32, window_secs: u64, min_interval_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
            min_interval_secs,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit::new(10, 86_400, 0)
    }
}

/// Bounded exponential backoff for transient publish failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// A gate's rewrite counter above this forces REJECT
    pub max_rewrite_loops: u32,
    /// Minimum structural quality score (0-100)
    pub quality_threshold: u8,
    /// Risk at or above this is rejected unconditionally
    pub risk_reject_threshold: u8,
    /// Risk at or above this needs elevated review
    pub risk_review_threshold: u8,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub max_concurrent_stages: usize,
    pub generation_timeout_secs: u64,
    /// Allowed backwards step between consecutive audit timestamps
    pub clock_skew_tolerance_ms: u64,
    pub retry: RetryPolicy,
    pub rate_limits: BTreeMap<String, RateLimit>,
    /// Used for destinations missing from `rate_limits`
    pub default_rate_limit: RateLimit,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let rate_limits = [
            ("tiktok", RateLimit::new(10, 86_400, 3_600)),
            ("instagram", RateLimit::new(25, 86_400, 1_800)),
            ("x", RateLimit::new(50, 86_400, 600)),
            ("pinterest", RateLimit::new(50, 86_400, 600)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            max_rewrite_loops: 3,
            quality_threshold: 60,
            risk_reject_threshold: 70,
            risk_review_threshold: 40,
            breaker_failure_threshold: 3,
            breaker_cooldown_secs: 15 * 60,
            max_concurrent_stages: 5,
            generation_timeout_secs: 120,
            clock_skew_tolerance_ms: 2_000,
            retry: RetryPolicy::default(),
            rate_limits,
            default_rate_limit: RateLimit::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.risk_review_threshold >= self.risk_reject_threshold {
            return Err(GateError::InvalidConfig(format!(
                "risk_review_threshold ({}) must be below risk_reject_threshold ({})",
                self.risk_review_threshold, self.risk_reject_threshold
            )));
        }
        if self.risk_reject_threshold > 100 || self.quality_threshold > 100 {
            return Err(GateError::InvalidConfig(
                "thresholds must be within 0-100".to_string(),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(GateError::InvalidConfig(
                "breaker_failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_stages == 0 {
            return Err(GateError::InvalidConfig(
                "max_concurrent_stages must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(GateError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let limits = self
            .rate_limits
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .chain(std::iter::once(("default", &self.default_rate_limit)));
        for (dest, limit) in limits {
            if limit.max_requests == 0 || limit.window_secs == 0 {
                return Err(GateError::InvalidConfig(format!(
                    "rate limit for {dest} must allow at least one request per non-empty window"
                )));
            }
        }
        Ok(())
    }

    pub fn rate_limit_for(&self, destination: &str) -> RateLimit {
        self.rate_limits
            .get(destination)
            .copied()
            .unwrap_or(self.default_rate_limit)
    }

    pub fn breaker_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.breaker_cooldown_secs as i64)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn clock_skew_tolerance(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.clock_skew_tolerance_ms as i64)
    }
}
