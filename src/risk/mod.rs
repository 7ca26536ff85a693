//! Risk gate: circuit breaker, rate limiter and the execution path that
//! composes them.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod execution;
pub mod limits;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, CircuitState, TripReason};
pub use config::{
    CircuitBreakerConfig, EndpointLimit, RateLimitConfig, RiskConfig, RiskLimitsConfig,
};
pub use error::{ConfigError, ExchangeError, ExecutionError};
pub use execution::{
    CANCEL_ORDER_ENDPOINT, CancelRequest, ExchangeAck, ExchangeClient, ExecutionGate, OrderAction,
    OrderRequest, OrderType, PLACE_ORDER_ENDPOINT, RetryPolicy,
};
pub use limits::{RiskLimits, RiskSnapshot};
pub use rate_limiter::{RateLimiter, RateWindowStats};
