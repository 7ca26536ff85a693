//! Circuit breaker: halts outbound trading after repeated failures or a
//! business-level limit breach, then lets a single probe test recovery.
//!
//! ```text
//! CLOSED --threshold failures / trip()--> OPEN
//! OPEN   --cooldown elapsed, allow()-->   HALF_OPEN (one probe)
//! HALF_OPEN --probe success-->            CLOSED
//! HALF_OPEN --probe failure-->            OPEN (longer cooldown)
//! ```
//!
//! All state sits behind one mutex held only for the transition itself.
//! [`CircuitBreaker::allow`] never blocks on I/O and hands out at most one
//! probe while half-open.

use super::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Span, debug, error, info, info_span, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused until the cooldown elapses.
    Open,
    /// One probe call is allowed to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Why the breaker last opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    /// Consecutive call failures reached the threshold.
    FailureThreshold,
    /// The half-open probe failed.
    ProbeFailed,
    /// Daily loss limit breached.
    DailyLossLimit,
    /// Drawdown from peak equity breached.
    MaxDrawdown,
    /// Too many losing trades in a row.
    ConsecutiveLosses,
    /// Forced by an operator.
    Manual,
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success or close.
    pub failure_count: u32,
    /// Consecutive failed probes since the last close.
    pub reopen_attempts: u32,
    /// Times the breaker opened since creation.
    pub trips: u64,
    /// Cooldown left while open.
    pub cooldown_remaining: Option<Duration>,
    /// Reason of the most recent trip.
    pub last_trip: Option<TripReason>,
    /// Whether a half-open probe is outstanding.
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    cooldown_until: Option<Instant>,
    reopen_attempts: u32,
    probe_in_flight: bool,
    last_trip: Option<TripReason>,
    trips: u64,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            cooldown_until: None,
            reopen_attempts: 0,
            probe_in_flight: false,
            last_trip: None,
            trips: 0,
        }
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.state {
            CircuitState::Open => self
                .cooldown_until
                .map(|until| until.saturating_duration_since(now)),
            _ => None,
        }
    }
}

/// Failure and risk driven trading halt.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    span: Span,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::closed()),
            span: info_span!("circuit_breaker"),
        }
    }

    /// Replaces the logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Configuration in force.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may proceed right now.
    ///
    /// Moves OPEN to HALF_OPEN once the cooldown has elapsed and grants the
    /// single probe. Every other caller gets `false` until that probe is
    /// resolved through [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`release_probe`](Self::release_probe).
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner.cooldown_until.is_none_or(|until| now >= until);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(
                        parent: &self.span,
                        "cooldown elapsed, half-open (attempt {})",
                        inner.reopen_attempts + 1
                    );
                }
                elapsed
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Reports a successful call.
    ///
    /// Closes a half-open breaker and clears the failure count.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                let trips = inner.trips;
                let last_trip = inner.last_trip;
                *inner = BreakerInner::closed();
                inner.trips = trips;
                inner.last_trip = last_trip;
                info!(parent: &self.span, "probe succeeded, circuit closed");
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    /// Reports a failed call.
    ///
    /// Opens the breaker once the threshold is reached; a failed probe
    /// re-opens it immediately with a longer cooldown.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.reopen_attempts = inner.reopen_attempts.saturating_add(1);
                let cooldown = self.config.cooldown_for(inner.reopen_attempts);
                self.open(&mut inner, TripReason::ProbeFailed, cooldown, now);
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                let cooldown = self.config.cooldown_for(inner.reopen_attempts);
                self.open(&mut inner, TripReason::FailureThreshold, cooldown, now);
            }
            CircuitState::Closed => {
                debug!(
                    parent: &self.span,
                    "failure {}/{}", inner.failure_count, self.config.failure_threshold
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Forces the breaker open for at least `cooldown`.
    ///
    /// An already longer cooldown is kept.
    pub fn trip(&self, reason: TripReason, cooldown: Duration) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if inner.state == CircuitState::Open
            && inner.cooldown_until.is_some_and(|until| until > now + cooldown)
        {
            inner.last_trip = Some(reason);
            return;
        }
        self.open(&mut inner, reason, cooldown, now);
    }

    fn open(&self, inner: &mut BreakerInner, reason: TripReason, cooldown: Duration, now: Instant) {
        inner.state = CircuitState::Open;
        inner.cooldown_until = Some(now + cooldown);
        inner.probe_in_flight = false;
        inner.last_trip = Some(reason);
        inner.trips += 1;
        error!(
            parent: &self.span,
            "circuit opened ({:?}) after {} failures, cooldown {:?}",
            reason,
            inner.failure_count,
            cooldown
        );
    }

    /// Gives back a probe that never reached the exchange.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            debug!(parent: &self.span, "probe released unused");
        }
    }

    /// Closes the breaker and forgets all counters except the trip history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let trips = inner.trips;
        let last_trip = inner.last_trip;
        *inner = BreakerInner::closed();
        inner.trips = trips;
        inner.last_trip = last_trip;
        warn!(parent: &self.span, "circuit manually reset");
    }

    /// Current state without triggering any transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failures since the last success or close.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Cooldown left while open.
    pub fn retry_in(&self) -> Option<Duration> {
        self.inner.lock().remaining(Instant::now())
    }

    /// Time since the most recent failure.
    pub fn since_last_failure(&self) -> Option<Duration> {
        self.inner
            .lock()
            .last_failure_time
            .map(|at| Instant::now().saturating_duration_since(at))
    }

    /// Snapshot of the breaker.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            reopen_attempts: inner.reopen_attempts,
            trips: inner.trips,
            cooldown_remaining: inner.remaining(Instant::now()),
            last_trip: inner.last_trip,
            probe_in_flight: inner.probe_in_flight,
        }
    }
}
