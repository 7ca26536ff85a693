//! Per-endpoint sliding-window rate limiter.
//!
//! Each window keeps the instants of the calls admitted during the last
//! `window` and admits a new call while fewer than
//! `floor(max_requests * (1 + burst_allowance_factor))` remain. Endpoints
//! share a window when they resolve to the same configured prefix;
//! endpoints no prefix matches get their own window with the default limit.

use super::config::{EndpointLimit, RateLimitConfig};
use super::error::ExecutionError;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{Span, debug, info_span, warn};

/// Point-in-time view of one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindowStats {
    /// Prefix (or full endpoint) the window is keyed by.
    pub key: String,
    /// Calls admitted within the current window.
    pub in_window: usize,
    /// Admission cap including the burst allowance.
    pub effective_max: usize,
    /// Calls admitted since creation.
    pub admitted: u64,
    /// Admission attempts that had to wait or were refused.
    pub throttled: u64,
}

#[derive(Debug)]
struct RateWindow {
    limit: EndpointLimit,
    effective_max: usize,
    timestamps: VecDeque<Instant>,
    admitted: u64,
    throttled: u64,
}

impl RateWindow {
    fn new(limit: EndpointLimit, burst_allowance_factor: f64) -> Self {
        let effective_max = limit.effective_max(burst_allowance_factor);
        Self {
            limit,
            effective_max,
            timestamps: VecDeque::with_capacity(effective_max),
            admitted: 0,
            throttled: 0,
        }
    }

    fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) < self.limit.window {
                break;
            }
            self.timestamps.pop_front();
        }
    }
}

enum Admission {
    Admitted,
    Wait(Duration),
}

/// Sliding-window admission control for outbound calls.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, RateWindow>,
    span: Span,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    /// Creates a limiter with no recorded calls.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            span: info_span!("rate_limiter"),
        }
    }

    /// Replaces the logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Configuration in force.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window_key(&self, endpoint: &str) -> (String, EndpointLimit) {
        match self.config.resolve(endpoint) {
            Some((prefix, limit)) => (prefix.to_string(), *limit),
            None => (endpoint.to_string(), self.config.default_limit),
        }
    }

    fn admit(&self, endpoint: &str) -> Admission {
        let (key, limit) = self.window_key(endpoint);
        let burst = self.config.burst_allowance_factor;
        let mut window = self
            .windows
            .entry(key)
            .or_insert_with(|| RateWindow::new(limit, burst));
        let now = Instant::now();
        window.purge(now);

        if window.timestamps.len() < window.effective_max {
            window.timestamps.push_back(now);
            window.admitted += 1;
            return Admission::Admitted;
        }

        window.throttled += 1;
        let wait = window
            .timestamps
            .front()
            .map(|&oldest| {
                window
                    .limit
                    .window
                    .saturating_sub(now.saturating_duration_since(oldest))
            })
            .unwrap_or(window.limit.window);
        Admission::Wait(wait)
    }

    /// Admits the call if a slot is free right now.
    pub fn try_acquire(&self, endpoint: &str) -> bool {
        matches!(self.admit(endpoint), Admission::Admitted)
    }

    /// Waits for a slot, up to the configured acquire timeout.
    ///
    /// # Errors
    /// [`ExecutionError::RateLimitTimeout`] when no slot frees up in time.
    pub async fn acquire(&self, endpoint: &str) -> Result<(), ExecutionError> {
        self.acquire_with_timeout(endpoint, self.config.acquire_timeout)
            .await
    }

    /// Waits for a slot, up to `limit`.
    ///
    /// # Errors
    /// [`ExecutionError::RateLimitTimeout`] when no slot frees up in time.
    pub async fn acquire_with_timeout(
        &self,
        endpoint: &str,
        limit: Duration,
    ) -> Result<(), ExecutionError> {
        timeout(limit, self.wait_for_slot(endpoint))
            .await
            .map_err(|_| {
                warn!(parent: &self.span, "gave up on {} after {:?}", endpoint, limit);
                ExecutionError::RateLimitTimeout {
                    endpoint: endpoint.to_string(),
                    waited: limit,
                }
            })
    }

    async fn wait_for_slot(&self, endpoint: &str) {
        loop {
            match self.admit(endpoint) {
                Admission::Admitted => {
                    debug!(parent: &self.span, "admitted {}", endpoint);
                    return;
                }
                // Other callers may have taken the slot meanwhile, so re-check after waking.
                Admission::Wait(wait) => {
                    warn!(parent: &self.span, "rate limit reached for {}, waiting {:?}", endpoint, wait);
                    sleep(wait).await;
                }
            }
        }
    }

    /// Stats for the window `endpoint` resolves to, if it has been used.
    pub fn stats(&self, endpoint: &str) -> Option<RateWindowStats> {
        let (key, _) = self.window_key(endpoint);
        let now = Instant::now();
        self.windows.get_mut(&key).map(|mut window| {
            window.purge(now);
            RateWindowStats {
                key: key.clone(),
                in_window: window.timestamps.len(),
                effective_max: window.effective_max,
                admitted: window.admitted,
                throttled: window.throttled,
            }
        })
    }

    /// Stats for every window in use, sorted by key.
    pub fn all_stats(&self) -> Vec<RateWindowStats> {
        let keys: Vec<String> = self.windows.iter().map(|entry| entry.key().clone()).collect();
        let mut stats: Vec<_> = keys.iter().filter_map(|key| self.stats(key)).collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }

    /// Forgets every recorded call.
    pub fn reset(&self) {
        self.windows.clear();
    }
}
