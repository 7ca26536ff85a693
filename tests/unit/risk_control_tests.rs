//! Circuit breaker and rate limiter behaviour under (paused) tokio time.

use orderbook_sync::risk::{EndpointLimit, RiskLimitsConfig};
use orderbook_sync::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig, RateLimiter, RiskConfig,
    RiskLimits, TripReason,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, advance};

fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
    CircuitBreaker::new(
        CircuitBreakerConfig::default()
            .with_failure_threshold(threshold)
            .with_recovery_timeout(Duration::from_secs(cooldown_secs)),
    )
}

#[tokio::test(start_paused = true)]
async fn test_breaker_threshold_cycle() {
    let breaker = breaker(3, 10);

    breaker.record_failure();
    breaker.record_failure();
    assert!(breaker.allow());
    assert_eq!(breaker.state(), CircuitState::Closed);

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.allow());

    advance(Duration::from_secs(9)).await;
    assert!(!breaker.allow());

    advance(Duration::from_secs(1)).await;
    assert!(breaker.allow());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    // single probe
    assert!(!breaker.allow());

    breaker.record_success();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
    assert!(breaker.allow());
}

#[tokio::test(start_paused = true)]
async fn test_failed_probes_back_off_to_cap() {
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_secs(60))
            .with_max_recovery_timeout(Duration::from_secs(300))
            .with_backoff_multiplier(2.0),
    );
    breaker.record_failure();

    advance(Duration::from_secs(60)).await;
    for cooldown in [120u64, 240, 300, 300] {
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.retry_in(), Some(Duration::from_secs(cooldown)));
        advance(Duration::from_secs(cooldown)).await;
    }
    assert_eq!(breaker.stats().last_trip, Some(TripReason::ProbeFailed));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_bound_holds() {
    let limiter = RateLimiter::new(
        RateLimitConfig::empty(EndpointLimit::new(10, Duration::from_secs(1)))
            .with_burst_allowance_factor(0.0),
    );
    let start = Instant::now();
    for _ in 0..11 {
        limiter.acquire("/v5/order/create").await.expect("slot");
    }
    assert!(start.elapsed() >= Duration::from_secs(1));

    let stats = limiter.stats("/v5/order/create").expect("window");
    assert_eq!(stats.effective_max, 10);
    assert!(stats.in_window <= 10);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_burst_allowance() {
    let limiter = RateLimiter::new(
        RateLimitConfig::empty(EndpointLimit::new(20, Duration::from_secs(2)))
            .with_burst_allowance_factor(0.15),
    );
    let start = Instant::now();
    // floor(20 * 1.15) = 23 slots before anyone waits
    for _ in 0..23 {
        assert!(limiter.try_acquire("/v5/market/tickers"));
    }
    assert!(!limiter.try_acquire("/v5/market/tickers"));
    limiter.acquire("/v5/market/tickers").await.expect("slot");
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_times_out() {
    let limiter = RateLimiter::new(
        RateLimitConfig::empty(EndpointLimit::new(1, Duration::from_secs(60)))
            .with_burst_allowance_factor(0.0)
            .with_acquire_timeout(Duration::from_secs(5)),
    );
    limiter.acquire("/v5/order/cancel").await.expect("first slot");
    let err = limiter
        .acquire("/v5/order/cancel")
        .await
        .expect_err("window full");
    assert!(matches!(
        err,
        orderbook_sync::ExecutionError::RateLimitTimeout { ref endpoint, waited }
            if endpoint == "/v5/order/cancel" && waited == Duration::from_secs(5)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_limits_halt_blocks_breaker_for_cooldown() {
    let breaker = Arc::new(breaker(5, 60));
    let limits = RiskLimits::new(
        RiskLimitsConfig::default().with_halt_cooldown(Duration::from_secs(3600)),
        Arc::clone(&breaker),
        dec!(10000),
    );
    assert_eq!(limits.record_trade(dec!(-600)), Some(TripReason::DailyLossLimit));
    assert!(!breaker.allow());

    advance(Duration::from_secs(3599)).await;
    assert!(!breaker.allow());
    advance(Duration::from_secs(1)).await;
    assert!(breaker.allow());
}

#[test]
fn test_risk_config_from_json() {
    let config = RiskConfig::from_json(
        r#"{
            "circuit_breaker": {"failure_threshold": 3, "recovery_timeout": 1500},
            "rate_limits": {"burst_allowance_factor": 0.1}
        }"#,
    )
    .expect("config");
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(
        config.circuit_breaker.recovery_timeout,
        Duration::from_millis(1500)
    );
    assert_eq!(config.rate_limits.burst_allowance_factor, 0.1);
    assert_eq!(config.limits, RiskLimitsConfig::default());

    let round_trip = RiskConfig::from_json(&config.to_json().expect("json")).expect("config");
    assert_eq!(round_trip, config);
}
