//! Execution gate: the only path from an order intent to the exchange.
//!
//! Every action first asks the circuit breaker, then takes a rate-limit
//! slot for its endpoint, then calls the [`ExchangeClient`]. The outcome
//! is reported back to the breaker. No lock is held across the network
//! call.

use super::circuit_breaker::CircuitBreaker;
use super::config::{RiskConfig, duration_ms};
use super::error::{ExchangeError, ExecutionError};
use super::rate_limiter::RateLimiter;
use crate::orderbook::Side;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Span, debug, info_span, warn};
use uuid::Uuid;

/// Endpoint used for order placement.
pub const PLACE_ORDER_ENDPOINT: &str = "/v5/order/create";

/// Endpoint used for order cancellation.
pub const CANCEL_ORDER_ENDPOINT: &str = "/v5/order/cancel";

/// Order type of a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Rests at the given price.
    Limit,
    /// Takes liquidity immediately.
    Market,
}

/// Order placement intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Instrument.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Limit or market.
    pub order_type: OrderType,
    /// Order size.
    pub quantity: Decimal,
    /// Limit price; `None` for market orders.
    pub price: Option<Decimal>,
    /// Caller-side id, generated when not supplied.
    pub client_order_id: String,
    /// Only reduce an existing position.
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Limit order with a fresh client order id.
    pub fn limit(symbol: &str, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            client_order_id: Uuid::new_v4().to_string(),
            reduce_only: false,
        }
    }

    /// Market order with a fresh client order id.
    pub fn market(symbol: &str, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            client_order_id: Uuid::new_v4().to_string(),
            reduce_only: false,
        }
    }

    /// Uses the given client order id.
    pub fn with_client_order_id(mut self, id: &str) -> Self {
        self.client_order_id = id.to_string();
        self
    }

    /// Marks the order reduce-only.
    pub fn with_reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }
}

/// Cancellation intent. At least one id should be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Instrument.
    pub symbol: String,
    /// Exchange order id.
    pub order_id: Option<String>,
    /// Caller-side order id.
    pub client_order_id: Option<String>,
}

impl CancelRequest {
    /// Cancels by exchange order id.
    pub fn by_order_id(symbol: &str, order_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_id: Some(order_id.to_string()),
            client_order_id: None,
        }
    }

    /// Cancels by client order id.
    pub fn by_client_order_id(symbol: &str, client_order_id: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            order_id: None,
            client_order_id: Some(client_order_id.to_string()),
        }
    }
}

/// Anything that reaches the exchange through the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    /// Place an order.
    Place(OrderRequest),
    /// Cancel an order.
    Cancel(CancelRequest),
}

impl OrderAction {
    /// Rate-limit endpoint of the action.
    pub fn endpoint(&self) -> &'static str {
        match self {
            OrderAction::Place(_) => PLACE_ORDER_ENDPOINT,
            OrderAction::Cancel(_) => CANCEL_ORDER_ENDPOINT,
        }
    }

    /// Instrument of the action.
    pub fn symbol(&self) -> &str {
        match self {
            OrderAction::Place(request) => &request.symbol,
            OrderAction::Cancel(request) => &request.symbol,
        }
    }
}

/// Exchange acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeAck {
    /// Exchange order id.
    pub order_id: String,
    /// Echoed client order id.
    pub client_order_id: Option<String>,
}

/// Outbound exchange API, implemented outside this crate.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Places an order.
    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeAck, ExchangeError>;

    /// Cancels an order.
    async fn cancel_order(&self, request: &CancelRequest) -> Result<ExchangeAck, ExchangeError>;
}

#[async_trait]
impl<T: ExchangeClient + ?Sized> ExchangeClient for Arc<T> {
    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeAck, ExchangeError> {
        (**self).place_order(request).await
    }

    async fn cancel_order(&self, request: &CancelRequest) -> Result<ExchangeAck, ExchangeError> {
        (**self).cancel_order(request).await
    }
}

/// Exponential backoff for [`ExecutionGate::submit_with_retry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Upper bound for any delay.
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
    /// Delay growth per retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the attempt budget (at least 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the first delay.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Delay after the `retry`-th failure (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(32) as i32);
        let secs = (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64());
        if secs.is_finite() && secs >= 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            self.max_backoff
        }
    }
}

/// Circuit breaker plus rate limiter in front of an [`ExchangeClient`].
pub struct ExecutionGate<C> {
    client: C,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    span: Span,
}

impl<C> std::fmt::Debug for ExecutionGate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGate")
            .field("breaker", &self.breaker.stats())
            .finish_non_exhaustive()
    }
}

impl<C: ExchangeClient> ExecutionGate<C> {
    /// Gate over shared breaker and limiter instances.
    pub fn new(client: C, breaker: Arc<CircuitBreaker>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            breaker,
            limiter,
            span: info_span!("execution_gate"),
        }
    }

    /// Gate with a fresh breaker and limiter built from `config`.
    pub fn from_config(client: C, config: &RiskConfig) -> Self {
        Self::new(
            client,
            Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            Arc::new(RateLimiter::new(config.rate_limits.clone())),
        )
    }

    /// Replaces the logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The shared breaker, e.g. for [`RiskLimits`](super::RiskLimits).
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Sends one action through the breaker and the limiter.
    ///
    /// # Errors
    /// - [`ExecutionError::CircuitOpen`] without touching the network.
    /// - [`ExecutionError::RateLimitTimeout`] when no slot frees up in time.
    /// - [`ExecutionError::Exchange`] for the client's own failures.
    pub async fn submit(&self, action: &OrderAction) -> Result<ExchangeAck, ExecutionError> {
        if !self.breaker.allow() {
            let retry_in = self.breaker.retry_in();
            warn!(
                parent: &self.span,
                "refusing {} on {}: circuit open", action.endpoint(), action.symbol()
            );
            return Err(ExecutionError::CircuitOpen { retry_in });
        }

        let endpoint = action.endpoint();
        if let Err(err) = self.limiter.acquire(endpoint).await {
            self.breaker.release_probe();
            return Err(err);
        }

        let result = match action {
            OrderAction::Place(request) => self.client.place_order(request).await,
            OrderAction::Cancel(request) => self.client.cancel_order(request).await,
        };

        match &result {
            Ok(ack) => {
                debug!(parent: &self.span, "{} ok: {}", endpoint, ack.order_id);
                self.breaker.record_success();
            }
            Err(err) if err.counts_as_failure() => {
                warn!(parent: &self.span, "{} failed: {}", endpoint, err);
                self.breaker.record_failure();
            }
            Err(err) => {
                warn!(parent: &self.span, "{} rejected: {}", endpoint, err);
                self.breaker.record_success();
            }
        }
        result.map_err(ExecutionError::from)
    }

    /// Like [`submit`](Self::submit), retrying retryable failures with
    /// backoff.
    ///
    /// An exchange throttle waits at least its `retry_after`. A circuit
    /// open error is returned at once.
    pub async fn submit_with_retry(
        &self,
        action: &OrderAction,
        policy: &RetryPolicy,
    ) -> Result<ExchangeAck, ExecutionError> {
        let mut retry = 0;
        loop {
            let err = match self.submit(action).await {
                Ok(ack) => return Ok(ack),
                Err(err) => err,
            };
            if !err.is_retryable() || retry + 1 >= policy.max_attempts {
                return Err(err);
            }
            let mut delay = policy.backoff(retry);
            if let ExecutionError::Exchange(ExchangeError::RateLimited { retry_after }) = &err {
                delay = delay.max(*retry_after);
            }
            warn!(
                parent: &self.span,
                "attempt {} of {} failed ({}), retrying in {:?}",
                retry + 1,
                policy.max_attempts,
                err,
                delay
            );
            sleep(delay).await;
            retry += 1;
        }
    }
}
