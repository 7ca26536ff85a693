//! Risk gate configuration.
//!
//! Every component takes its configuration at construction time. All
//! structs load from JSON; durations are written as milliseconds.

use super::error::ConfigError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Serde adapter writing a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes as `u64` milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserializes from `u64` milliseconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures in a row that open the breaker.
    pub failure_threshold: u32,
    /// Cooldown after the first trip.
    #[serde(with = "duration_ms")]
    pub recovery_timeout: Duration,
    /// Upper bound for the grown cooldown.
    #[serde(with = "duration_ms")]
    pub max_recovery_timeout: Duration,
    /// Growth of the cooldown per consecutive re-open.
    pub backoff_multiplier: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            max_recovery_timeout: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

impl CircuitBreakerConfig {
    /// Sets the failure threshold (at least 1).
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the base cooldown.
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Sets the cooldown cap.
    pub fn with_max_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.max_recovery_timeout = timeout;
        self
    }

    /// Sets the cooldown growth factor (at least 1).
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Cooldown for the given number of consecutive re-opens.
    pub fn cooldown_for(&self, attempts: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempts.min(64) as i32);
        let scaled = self.recovery_timeout.as_secs_f64() * factor;
        let capped = scaled.min(self.max_recovery_timeout.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped).max(self.recovery_timeout.min(self.max_recovery_timeout))
        } else {
            self.max_recovery_timeout
        }
    }
}

/// Request budget for one endpoint prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimit {
    /// Requests allowed per window before the burst allowance.
    pub max_requests: u32,
    /// Window length.
    #[serde(with = "duration_ms")]
    pub window: Duration,
}

impl EndpointLimit {
    /// Creates a limit of `max_requests` per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// `floor(max_requests * (1 + burst))`, never below one.
    pub fn effective_max(&self, burst_allowance_factor: f64) -> usize {
        // Nudge past representation error so 100 * 1.15 floors to 115.
        let scaled = (self.max_requests as f64 * (1.0 + burst_allowance_factor) + 1e-9).floor();
        (scaled as usize).max(1)
    }
}

/// Sliding-window rate limiter tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Limit for endpoints no prefix matches.
    pub default_limit: EndpointLimit,
    /// Limits by endpoint prefix; the longest matching prefix wins.
    pub endpoints: BTreeMap<String, EndpointLimit>,
    /// Extra headroom on top of each limit, e.g. `0.15` for 15 %.
    pub burst_allowance_factor: f64,
    /// Longest time `acquire` may wait before failing.
    #[serde(with = "duration_ms")]
    pub acquire_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(
            "/v5/order".to_string(),
            EndpointLimit::new(10, Duration::from_secs(1)),
        );
        endpoints.insert(
            "/v5/market".to_string(),
            EndpointLimit::new(50, Duration::from_secs(1)),
        );
        Self {
            default_limit: EndpointLimit::new(100, Duration::from_secs(60)),
            endpoints,
            burst_allowance_factor: 0.15,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl RateLimitConfig {
    /// Configuration with no endpoint prefixes.
    pub fn empty(default_limit: EndpointLimit) -> Self {
        Self {
            default_limit,
            endpoints: BTreeMap::new(),
            ..Self::default()
        }
    }

    /// Adds or replaces the limit for an endpoint prefix.
    pub fn with_endpoint(mut self, prefix: &str, limit: EndpointLimit) -> Self {
        self.endpoints.insert(prefix.to_string(), limit);
        self
    }

    /// Sets the burst allowance (clamped to non-negative).
    pub fn with_burst_allowance_factor(mut self, factor: f64) -> Self {
        self.burst_allowance_factor = factor.max(0.0);
        self
    }

    /// Sets the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Longest configured prefix of `endpoint` and its limit.
    pub fn resolve(&self, endpoint: &str) -> Option<(&str, &EndpointLimit)> {
        self.endpoints
            .iter()
            .filter(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, limit)| (prefix.as_str(), limit))
    }
}

/// Business-level limits that force the breaker open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimitsConfig {
    /// Loss since the start of the day, in percent of day-start equity.
    pub max_daily_loss_pct: Decimal,
    /// Drop from peak equity, in percent.
    pub max_drawdown_pct: Decimal,
    /// Losing trades in a row.
    pub max_consecutive_losses: u32,
    /// How long a limit breach halts trading.
    #[serde(with = "duration_ms")]
    pub halt_cooldown: Duration,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: Decimal::from(5),
            max_drawdown_pct: Decimal::from(15),
            max_consecutive_losses: 5,
            halt_cooldown: Duration::from_secs(3600),
        }
    }
}

impl RiskLimitsConfig {
    /// Sets the daily loss limit in percent.
    pub fn with_max_daily_loss_pct(mut self, pct: Decimal) -> Self {
        self.max_daily_loss_pct = pct;
        self
    }

    /// Sets the drawdown limit in percent.
    pub fn with_max_drawdown_pct(mut self, pct: Decimal) -> Self {
        self.max_drawdown_pct = pct;
        self
    }

    /// Sets the losing streak limit. Zero disables it.
    pub fn with_max_consecutive_losses(mut self, losses: u32) -> Self {
        self.max_consecutive_losses = losses;
        self
    }

    /// Sets the halt duration.
    pub fn with_halt_cooldown(mut self, cooldown: Duration) -> Self {
        self.halt_cooldown = cooldown;
        self
    }
}

/// Everything the risk gate needs, in one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Rate limiter tuning.
    pub rate_limits: RateLimitConfig,
    /// Business-level limits.
    pub limits: RiskLimitsConfig,
}

impl RiskConfig {
    /// Loads and validates a JSON document. Missing fields take defaults.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.circuit_breaker.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_multiplier must be at least 1".to_string(),
            ));
        }
        if self.rate_limits.burst_allowance_factor < 0.0 {
            return Err(ConfigError::Invalid(
                "burst_allowance_factor must not be negative".to_string(),
            ));
        }
        let limits = std::iter::once(("default", &self.rate_limits.default_limit)).chain(
            self.rate_limits
                .endpoints
                .iter()
                .map(|(prefix, limit)| (prefix.as_str(), limit)),
        );
        for (name, limit) in limits {
            if limit.max_requests == 0 || limit.window.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "rate limit for {name} needs a positive request count and window"
                )));
            }
        }
        Ok(())
    }
}
