//! The execution gate in front of a mock exchange client.

use async_trait::async_trait;
use orderbook_sync::risk::{CancelRequest, ExchangeAck, OrderRequest, RetryPolicy};
use orderbook_sync::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ExchangeClient, ExchangeError,
    ExecutionError, ExecutionGate, OrderAction, RateLimitConfig, RateLimiter, Side,
};
use orderbook_sync::risk::EndpointLimit;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, advance};

/// Answers from a fixed script, then keeps acknowledging.
#[derive(Default)]
struct MockExchange {
    script: Mutex<Vec<Result<ExchangeAck, ExchangeError>>>,
    calls: AtomicUsize,
}

impl MockExchange {
    fn scripted(mut script: Vec<Result<ExchangeAck, ExchangeError>>) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, order_id: &str) -> Result<ExchangeAck, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().pop().unwrap_or_else(|| {
            Ok(ExchangeAck {
                order_id: order_id.to_string(),
                client_order_id: None,
            })
        })
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeAck, ExchangeError> {
        self.answer(&request.client_order_id)
    }

    async fn cancel_order(&self, request: &CancelRequest) -> Result<ExchangeAck, ExchangeError> {
        self.answer(&request.symbol)
    }
}

fn network() -> Result<ExchangeAck, ExchangeError> {
    Err(ExchangeError::Network("connection reset".to_string()))
}

fn gate(exchange: &Arc<MockExchange>, threshold: u32) -> ExecutionGate<Arc<MockExchange>> {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::default()
            .with_failure_threshold(threshold)
            .with_recovery_timeout(Duration::from_secs(30)),
    );
    let limiter = RateLimiter::new(
        RateLimitConfig::empty(EndpointLimit::new(5, Duration::from_secs(1)))
            .with_burst_allowance_factor(0.0)
            .with_acquire_timeout(Duration::from_secs(3)),
    );
    ExecutionGate::new(Arc::clone(exchange), Arc::new(breaker), Arc::new(limiter))
}

fn place() -> OrderAction {
    OrderAction::Place(
        OrderRequest::limit("BTCUSDT", Side::Buy, dec!(0.01), dec!(30000))
            .with_client_order_id("mm-1"),
    )
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_skips_network() {
    let exchange = MockExchange::scripted(vec![network(), network()]);
    let gate = gate(&exchange, 2);

    assert!(gate.submit(&place()).await.is_err());
    assert!(gate.submit(&place()).await.is_err());
    assert_eq!(gate.breaker().state(), CircuitState::Open);

    let err = gate.submit(&place()).await.expect_err("circuit open");
    assert!(matches!(err, ExecutionError::CircuitOpen { retry_in: Some(_) }));
    assert!(!err.is_retryable());
    assert_eq!(exchange.calls(), 2);

    advance(Duration::from_secs(30)).await;
    let ack = gate.submit(&place()).await.expect("probe succeeds");
    assert_eq!(ack.order_id, "mm-1");
    assert_eq!(gate.breaker().state(), CircuitState::Closed);
    assert_eq!(exchange.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_keeps_circuit_closed() {
    let rejected = || {
        Err(ExchangeError::Rejected {
            code: 110007,
            message: "insufficient balance".to_string(),
        })
    };
    let exchange = MockExchange::scripted(vec![rejected(), rejected(), rejected()]);
    let gate = gate(&exchange, 2);

    for _ in 0..3 {
        let err = gate
            .submit_with_retry(&place(), &RetryPolicy::default())
            .await
            .expect_err("rejected");
        assert!(matches!(
            err,
            ExecutionError::Exchange(ExchangeError::Rejected { code: 110007, .. })
        ));
    }
    assert_eq!(gate.breaker().state(), CircuitState::Closed);
    // rejections are never retried
    assert_eq!(exchange.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_honours_exchange_retry_after() {
    let exchange = MockExchange::scripted(vec![
        Err(ExchangeError::RateLimited {
            retry_after: Duration::from_secs(2),
        }),
        network(),
    ]);
    let gate = gate(&exchange, 5);
    let policy = RetryPolicy::default().with_initial_backoff(Duration::from_millis(100));

    let start = Instant::now();
    let ack = gate
        .submit_with_retry(&place(), &policy)
        .await
        .expect("third attempt");
    assert_eq!(ack.order_id, "mm-1");
    assert_eq!(exchange.calls(), 3);
    // 2s exchange delay, then 200ms backoff
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2200), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spreads_bursts() {
    let exchange = MockExchange::scripted(vec![]);
    let gate = gate(&exchange, 5);
    let cancel = OrderAction::Cancel(CancelRequest::by_order_id("BTCUSDT", "42"));

    let start = Instant::now();
    for _ in 0..5 {
        gate.submit(&cancel).await.expect("within limit");
    }
    assert!(start.elapsed() < Duration::from_millis(1));
    gate.submit(&cancel).await.expect("after window");
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(exchange.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_timeout_returns_probe() {
    let exchange = MockExchange::scripted(vec![network()]);
    let breaker = Arc::new(CircuitBreaker::new(
        CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_secs(5)),
    ));
    let limiter = Arc::new(RateLimiter::new(
        RateLimitConfig::empty(EndpointLimit::new(1, Duration::from_secs(60)))
            .with_burst_allowance_factor(0.0)
            .with_acquire_timeout(Duration::from_secs(1)),
    ));
    let gate = ExecutionGate::new(Arc::clone(&exchange), Arc::clone(&breaker), limiter);

    assert!(gate.submit(&place()).await.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);
    advance(Duration::from_secs(5)).await;

    let err = gate.submit(&place()).await.expect_err("no slot");
    assert!(matches!(err, ExecutionError::RateLimitTimeout { .. }));
    assert_eq!(exchange.calls(), 1);
    // the probe was handed back so the next caller can try
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.allow());
}
