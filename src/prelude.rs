/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/10/25
******************************************************************************/

//! Prelude module that re-exports commonly used types and traits.
//!
//! ```rust
//! use orderbook_sync::prelude::*;
//! ```

// Order book and reconciliation
pub use crate::orderbook::{
    ApplyReport, BookDepth, BookHandle, BookManager, ContiguityRule, CrossedBookAnomaly,
    FeedEvent, FeedMessage, FeedSender, GateOutcome, LevelUpdate, OrderBook, OrderBookError,
    OrderBookSnapshot, PriceLevel, RawLevel, ResyncReason, ResyncRequest, SequenceGate, Side,
    SyncError, SyncState,
};

// Stores
pub use crate::orderbook::{IndexedHeapStore, PriceLevelStore, SkipListStore, StoreConfig};

// Risk gate
pub use crate::risk::{
    CancelRequest, CircuitBreaker, CircuitBreakerConfig, CircuitState, EndpointLimit,
    ExchangeAck, ExchangeClient, ExchangeError, ExecutionError, ExecutionGate, OrderAction,
    OrderRequest, OrderType, RateLimitConfig, RateLimiter, RetryPolicy, RiskConfig, RiskLimits,
    RiskLimitsConfig, TripReason,
};

// Utility functions
pub use crate::utils::current_time_millis;

// Type aliases
pub use crate::{HeapOrderBook, SkipListOrderBook};
