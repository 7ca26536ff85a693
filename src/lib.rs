//! # Exchange-Consistent Order Books and Risk Gate
//!
//! Local order books reconciled from an unreliable snapshot plus delta
//! feed, and the risk controls every outbound order passes through before
//! it reaches an exchange.
//!
//! ## Key Features
//!
//! - **Two interchangeable price level stores**: an arena-backed skip list
//!   and an indexed binary heap, both behind the [`PriceLevelStore`] trait
//!   and selected at construction time through the book's type parameter.
//!
//! - **Sequence reconciliation**: the [`SequenceGate`] drops replayed and
//!   stale deltas, detects gaps under a configurable [`ContiguityRule`],
//!   and reports through [`BookHandle::is_fresh`] whether the book can be
//!   trusted until a new snapshot arrives.
//!
//! - **Single writer per symbol**: [`BookManager`] runs one tokio task per
//!   symbol that owns the feed channel and the gate; readers share the book
//!   through a read-write lock and always see a consistent point in time.
//!
//! - **Crossed-book detection**: a book where the best bid reaches the best
//!   ask is reported as a [`CrossedBookAnomaly`] and left as-is for the
//!   next delta to repair.
//!
//! - **Circuit breaker**: CLOSED, OPEN and HALF_OPEN states with a single
//!   probe, exponential cooldown growth on failed probes, and forced halts
//!   from business limits ([`RiskLimits`]).
//!
//! - **Sliding-window rate limiter**: per endpoint prefix, with a burst
//!   allowance and a bounded wait that fails with
//!   [`ExecutionError::RateLimitTimeout`].
//!
//! - **Execution gate**: [`ExecutionGate::submit`] checks the breaker, takes
//!   a rate-limit slot, calls the [`ExchangeClient`] and reports the outcome
//!   back; [`ExecutionGate::submit_with_retry`] retries only retryable
//!   failures.
//!
//! ## Logging
//!
//! Everything is logged through `tracing`. Each component owns a span that
//! can be replaced with `with_span`; the crate never installs a subscriber.
//!
//! ## Example
//!
//! ```rust
//! use orderbook_sync::prelude::*;
//!
//! let mut gate: SequenceGate =
//!     SequenceGate::new("BTCUSDT", ContiguityRule::Monotonic, &StoreConfig::default());
//! let book = gate.handle();
//!
//! let snapshot = FeedMessage::from_json(
//!     r#"{"type":"snapshot","bids":[["100","1"],["99","2"]],"asks":[["101","1"]],"seq":10}"#,
//! )
//! .unwrap();
//! gate.on_message(&snapshot).unwrap();
//! assert!(book.is_fresh());
//!
//! let delta = FeedMessage::from_json(r#"{"type":"delta","bids":[["100","0"]],"asks":[],"seq":11}"#)
//!     .unwrap();
//! gate.on_message(&delta).unwrap();
//! let (bid, ask) = book.best_bid_ask();
//! assert_eq!(bid.map(|p| p.to_string()), Some("99".to_string()));
//! assert_eq!(ask.map(|p| p.to_string()), Some("101".to_string()));
//! ```

pub mod orderbook;
pub mod risk;

pub mod prelude;
mod utils;

pub use orderbook::{
    ApplyReport, BookDepth, BookHandle, BookManager, ContiguityRule, CrossedBookAnomaly,
    FeedEvent, FeedMessage, GateOutcome, IndexedHeapStore, LevelUpdate, OrderBook,
    OrderBookError, OrderBookSnapshot, OrderBookSnapshotPackage, PriceLevel, PriceLevelStore,
    ResyncReason, ResyncRequest, SequenceGate, Side, SkipListStore, StoreConfig, SyncError,
    SyncState,
};
pub use risk::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ExchangeClient, ExchangeError,
    ExecutionError, ExecutionGate, OrderAction, RateLimitConfig, RateLimiter, RiskConfig,
    RiskLimits, TripReason,
};
pub use utils::current_time_millis;

/// Order book backed by the indexed heap store.
pub type HeapOrderBook = OrderBook<IndexedHeapStore>;

/// Order book backed by the skip list store (the default).
pub type SkipListOrderBook = OrderBook<SkipListStore>;
