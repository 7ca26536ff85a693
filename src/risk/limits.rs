//! Business-level halts layered on the circuit breaker.
//!
//! Daily loss, drawdown from peak equity and losing streaks do not count
//! as call failures; they force the shared breaker open for the configured
//! halt cooldown instead.

use super::circuit_breaker::{CircuitBreaker, TripReason};
use super::config::RiskLimitsConfig;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Span, debug, error, info, info_span};

/// Equity and streak figures the limits are evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    /// Current equity.
    pub equity: Decimal,
    /// Highest equity seen.
    pub peak_equity: Decimal,
    /// Equity at the start of the trading day.
    pub day_start_equity: Decimal,
    /// Loss since day start in percent (negative when up).
    pub daily_loss_pct: Decimal,
    /// Drop from peak in percent.
    pub drawdown_pct: Decimal,
    /// Losing trades in a row.
    pub consecutive_losses: u32,
}

#[derive(Debug)]
struct LimitState {
    equity: Decimal,
    peak_equity: Decimal,
    day_start_equity: Decimal,
    consecutive_losses: u32,
}

impl LimitState {
    fn pct_below(reference: Decimal, equity: Decimal) -> Decimal {
        if reference > Decimal::ZERO {
            (reference - equity) / reference * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    }

    fn snapshot(&self) -> RiskSnapshot {
        RiskSnapshot {
            equity: self.equity,
            peak_equity: self.peak_equity,
            day_start_equity: self.day_start_equity,
            daily_loss_pct: Self::pct_below(self.day_start_equity, self.equity),
            drawdown_pct: Self::pct_below(self.peak_equity, self.equity),
            consecutive_losses: self.consecutive_losses,
        }
    }
}

/// Tracks equity and trips the breaker when a limit is breached.
#[derive(Debug)]
pub struct RiskLimits {
    config: RiskLimitsConfig,
    breaker: Arc<CircuitBreaker>,
    state: Mutex<LimitState>,
    span: Span,
}

impl RiskLimits {
    /// Starts tracking from `starting_equity`.
    pub fn new(config: RiskLimitsConfig, breaker: Arc<CircuitBreaker>, starting_equity: Decimal) -> Self {
        Self {
            config,
            breaker,
            state: Mutex::new(LimitState {
                equity: starting_equity,
                peak_equity: starting_equity,
                day_start_equity: starting_equity,
                consecutive_losses: 0,
            }),
            span: info_span!("risk_limits"),
        }
    }

    /// Replaces the logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Books a closed trade's profit or loss and checks the limits.
    ///
    /// Returns the reason if this trade tripped the breaker.
    pub fn record_trade(&self, pnl: Decimal) -> Option<TripReason> {
        let mut state = self.state.lock();
        state.equity += pnl;
        state.peak_equity = state.peak_equity.max(state.equity);
        if pnl < Decimal::ZERO {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }
        debug!(
            parent: &self.span,
            "trade pnl {}, equity {}, losing streak {}", pnl, state.equity, state.consecutive_losses
        );
        self.enforce(&mut state)
    }

    /// Replaces the equity figure (e.g. from a wallet balance poll) and
    /// checks the limits.
    pub fn update_equity(&self, equity: Decimal) -> Option<TripReason> {
        let mut state = self.state.lock();
        state.equity = equity;
        state.peak_equity = state.peak_equity.max(equity);
        self.enforce(&mut state)
    }

    /// Starts a new trading day at the current equity.
    pub fn reset_day(&self) {
        let mut state = self.state.lock();
        state.day_start_equity = state.equity;
        info!(parent: &self.span, "new trading day at equity {}", state.equity);
    }

    /// Current figures.
    pub fn snapshot(&self) -> RiskSnapshot {
        self.state.lock().snapshot()
    }

    fn breach(&self, state: &LimitState) -> Option<TripReason> {
        let figures = state.snapshot();
        if figures.daily_loss_pct >= self.config.max_daily_loss_pct {
            Some(TripReason::DailyLossLimit)
        } else if figures.drawdown_pct >= self.config.max_drawdown_pct {
            Some(TripReason::MaxDrawdown)
        } else if self.config.max_consecutive_losses > 0
            && state.consecutive_losses >= self.config.max_consecutive_losses
        {
            Some(TripReason::ConsecutiveLosses)
        } else {
            None
        }
    }

    fn enforce(&self, state: &mut LimitState) -> Option<TripReason> {
        let reason = self.breach(state)?;
        let figures = state.snapshot();
        error!(
            parent: &self.span,
            "{:?} breached: daily loss {}%, drawdown {}%, losing streak {}",
            reason,
            figures.daily_loss_pct.round_dp(2),
            figures.drawdown_pct.round_dp(2),
            figures.consecutive_losses
        );
        if reason == TripReason::ConsecutiveLosses {
            state.consecutive_losses = 0;
        }
        self.breaker.trip(reason, self.config.halt_cooldown);
        Some(reason)
    }
}
