//! Sends orders through the execution gate against a flaky simulated
//! exchange and shows the breaker opening, cooling down and closing.

use async_trait::async_trait;
use demos::setup_logger;
use orderbook_sync::risk::{CancelRequest, ExchangeAck, OrderRequest, RetryPolicy};
use orderbook_sync::{
    CircuitBreakerConfig, ExchangeClient, ExchangeError, ExecutionGate, OrderAction, RiskConfig,
    Side,
};
use rust_decimal::Decimal;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Fails every call while `outage` covers the call number.
struct SimulatedExchange {
    calls: AtomicU64,
    outage: std::ops::Range<u64>,
}

impl SimulatedExchange {
    fn respond(&self, client_order_id: Option<&str>) -> Result<ExchangeAck, ExchangeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.outage.contains(&call) {
            return Err(ExchangeError::Network("gateway timeout".to_string()));
        }
        Ok(ExchangeAck {
            order_id: format!("ex-{call}"),
            client_order_id: client_order_id.map(str::to_string),
        })
    }
}

#[async_trait]
impl ExchangeClient for SimulatedExchange {
    async fn place_order(&self, request: &OrderRequest) -> Result<ExchangeAck, ExchangeError> {
        self.respond(Some(&request.client_order_id))
    }

    async fn cancel_order(&self, request: &CancelRequest) -> Result<ExchangeAck, ExchangeError> {
        self.respond(request.client_order_id.as_deref())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_logger();

    let config = RiskConfig {
        circuit_breaker: CircuitBreakerConfig::default()
            .with_failure_threshold(3)
            .with_recovery_timeout(Duration::from_millis(500)),
        ..RiskConfig::default()
    };
    config.validate()?;
    info!("risk config:\n{}", config.to_json()?);

    let exchange = SimulatedExchange {
        calls: AtomicU64::new(0),
        outage: 2..6,
    };
    let gate = ExecutionGate::from_config(exchange, &config);
    let policy = RetryPolicy::none();

    for i in 0..12u32 {
        let price = Decimal::new(3_000_000 + i64::from(i), 2);
        let action = OrderAction::Place(OrderRequest::limit(
            "BTCUSDT",
            Side::Buy,
            Decimal::new(1, 3),
            price,
        ));
        match gate.submit_with_retry(&action, &policy).await {
            Ok(ack) => info!("order {} placed as {}", i, ack.order_id),
            Err(err) => warn!("order {} failed: {} (retryable: {})", i, err, err.is_retryable()),
        }
        info!("breaker: {:?}", gate.breaker().stats());
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    for stats in gate.limiter().all_stats() {
        info!(
            "window {}: {} admitted, {} throttled",
            stats.key, stats.admitted, stats.throttled
        );
    }
    Ok(())
}
