//! Risk gate error types

use std::time::Duration;
use thiserror::Error;

/// Failures reported by the exchange client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ExchangeError {
    /// The exchange throttled the call; retry after the given delay.
    #[error("rate limited by exchange, retry after {retry_after:?}")]
    RateLimited {
        /// Delay the exchange asked for.
        retry_after: Duration,
    },

    /// Transport failure or timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The exchange answered and refused the request (bad price, no funds, ...).
    #[error("rejected by exchange (code {code}): {message}")]
    Rejected {
        /// Exchange return code.
        code: i64,
        /// Exchange message.
        message: String,
    },

    /// Anything the caller must not retry (auth failure, malformed request).
    #[error("fatal exchange error: {0}")]
    Fatal(String),
}

impl ExchangeError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::RateLimited { .. } | ExchangeError::Network(_)
        )
    }

    /// Whether the failure says something about exchange health.
    ///
    /// A rejection proves the exchange is reachable and answering, so it
    /// does not count against the circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, ExchangeError::Rejected { .. })
    }
}

/// Errors surfaced by the execution gate.
///
/// [`ExecutionError::CircuitOpen`] and [`ExecutionError::RateLimitTimeout`]
/// are raised before any network call and must not be mistaken for
/// transient network failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// Trading is halted.
    #[error("circuit breaker open, retry in {retry_in:?}")]
    CircuitOpen {
        /// Time until the breaker allows a probe, if known.
        retry_in: Option<Duration>,
    },

    /// No rate-limit slot became free in time.
    #[error("rate limit slot for {endpoint} not acquired within {waited:?}")]
    RateLimitTimeout {
        /// Endpoint that was throttled.
        endpoint: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The exchange call itself failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl ExecutionError {
    /// Whether a retry of the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::Exchange(err) => err.is_retryable(),
            ExecutionError::RateLimitTimeout { .. } => true,
            ExecutionError::CircuitOpen { .. } => false,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid JSON for the expected shape.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
